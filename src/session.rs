//! SessionStore - reactive per-chain session state.
//!
//! Only the `ConnectionManager`, the SIWB bridge and the session watcher
//! write here; UI code subscribes. A `Session` is connected exactly when it
//! carries a principal, so "connected without principal" cannot be built.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};

use crate::btc::BtcNetwork;
use crate::core::chain::Chain;
use crate::core::keys;
use crate::drift::DriftReason;
use crate::error::{ConnectError, ConnectResult};
use crate::principal::Principal;
use crate::storage::SessionStorage;

const EVENT_CAPACITY: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    chain: Chain,
    principal: Option<Principal>,
    expires_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn disconnected(chain: Chain) -> Self {
        Self { chain, principal: None, expires_at: None }
    }

    pub fn connected(chain: Chain, principal: Principal, expires_at: Option<DateTime<Utc>>) -> ConnectResult<Self> {
        if !principal.is_authenticated() {
            return Err(ConnectError::InvalidPrincipal(format!(
                "refusing session for {}",
                principal.to_text()
            )));
        }
        Ok(Self { chain, principal: Some(principal), expires_at })
    }

    pub fn chain(&self) -> Chain { self.chain }
    pub fn is_connected(&self) -> bool { self.principal.is_some() }
    pub fn principal(&self) -> Option<&Principal> { self.principal.as_ref() }
    pub fn expires_at(&self) -> Option<DateTime<Utc>> { self.expires_at }
}

/// Address and network the Bitcoin session was established on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BtcLink {
    pub address: String,
    pub network: BtcNetwork,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForcedReason {
    Expired,
    Drift(DriftReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Connected { chain: Chain, principal: Principal },
    Disconnected { chain: Chain },
    /// Silent teardown; the UI should move to a route that needs no session.
    ForcedDisconnect { chain: Chain, reason: ForcedReason },
}

pub struct SessionStore {
    ledger: watch::Sender<Session>,
    bitcoin: watch::Sender<Session>,
    link: Mutex<Option<BtcLink>>,
    events: broadcast::Sender<SessionEvent>,
    storage: Arc<dyn SessionStorage>,
}

impl SessionStore {
    pub fn new(storage: Arc<dyn SessionStorage>) -> Self {
        let link = load_link(storage.as_ref());
        let (ledger, _) = watch::channel(Session::disconnected(Chain::Ledger));
        let (bitcoin, _) = watch::channel(Session::disconnected(Chain::Bitcoin));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self { ledger, bitcoin, link: Mutex::new(link), events, storage }
    }

    pub fn storage(&self) -> &Arc<dyn SessionStorage> { &self.storage }

    pub fn session(&self, chain: Chain) -> Session {
        self.sender(chain).borrow().clone()
    }

    pub fn is_connected(&self, chain: Chain) -> bool {
        self.sender(chain).borrow().is_connected()
    }

    pub fn principal(&self, chain: Chain) -> Option<Principal> {
        self.sender(chain).borrow().principal().cloned()
    }

    pub fn subscribe(&self, chain: Chain) -> watch::Receiver<Session> {
        self.sender(chain).subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn set_connected(
        &self,
        chain: Chain,
        principal: Principal,
        expires_at: Option<DateTime<Utc>>,
    ) -> ConnectResult<()> {
        let session = Session::connected(chain, principal.clone(), expires_at)?;
        if chain == Chain::Bitcoin {
            self.storage.set(keys::bitcoin::PRINCIPAL, &principal.to_text())?;
        }
        let previous = self.sender(chain).send_replace(session);
        if previous.principal() != Some(&principal) {
            tracing::info!(%chain, principal = %principal, "session connected");
            let _ = self.events.send(SessionEvent::Connected { chain, principal });
        }
        Ok(())
    }

    /// Clears the session. For Bitcoin the persisted session keys go too; the
    /// ledger expiry belongs to the delegated-identity connector. Storage
    /// failures are logged, the in-memory session is cleared regardless.
    pub fn set_disconnected(&self, chain: Chain) {
        let previous = self.sender(chain).send_replace(Session::disconnected(chain));
        if chain == Chain::Bitcoin {
            if let Err(e) = self.storage.remove_all(keys::bitcoin::SESSION) {
                tracing::warn!(%chain, error = %e, "failed to clear persisted session");
            }
            if let Ok(mut link) = self.link.lock() {
                *link = None;
            }
        }
        if previous.is_connected() {
            tracing::info!(%chain, "session disconnected");
            let _ = self.events.send(SessionEvent::Disconnected { chain });
        }
    }

    pub fn force_disconnected(&self, chain: Chain, reason: ForcedReason) {
        tracing::info!(%chain, ?reason, "forcing silent disconnect");
        self.set_disconnected(chain);
        let _ = self.events.send(SessionEvent::ForcedDisconnect { chain, reason });
    }

    /// Address and network the Bitcoin session is pinned to.
    pub fn link(&self) -> Option<BtcLink> {
        self.link.lock().ok()?.clone()
    }

    pub fn set_link(&self, link: BtcLink) -> ConnectResult<()> {
        self.storage.set(keys::bitcoin::ADDRESS, &link.address)?;
        self.storage.set(keys::bitcoin::NETWORK, link.network.as_str())?;
        let mut guard = self.link.lock().map_err(|_| ConnectError::Storage("session lock".into()))?;
        *guard = Some(link);
        Ok(())
    }

    fn sender(&self, chain: Chain) -> &watch::Sender<Session> {
        match chain {
            Chain::Ledger => &self.ledger,
            Chain::Bitcoin => &self.bitcoin,
        }
    }
}

fn load_link(storage: &dyn SessionStorage) -> Option<BtcLink> {
    let address = storage.get(keys::bitcoin::ADDRESS).ok()??;
    let network = BtcNetwork::from_str(&storage.get(keys::bitcoin::NETWORK).ok()??)?;
    Some(BtcLink { address, network })
}

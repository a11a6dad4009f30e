//! CrossChainIdentityBridge - Sign-In With Bitcoin.
//!
//! Converts proof of control of a Bitcoin address into a delegated identity
//! on the ledger.
//!
//! ```text
//! Idle ──connect(kind)──▶ ProviderConnected ──prepare──▶ ChallengePrepared
//!                                                              │ manual flag set
//!                                                              ▼
//!                     Authenticated ◀──login + delegation── Signing
//! ```
//!
//! Signing only happens when all of these hold: a challenge is ready for the
//! current address, the provider reports that address as connected, no
//! identity exists yet, and the user explicitly asked to connect (the manual
//! flag, bounded by `manual_connect_ttl`). Passive observations after an
//! account or network switch never prompt for a signature.
//!
//! `connect()` is not reentrant: a second call while one is pending fails
//! with `Busy`. A pending connect waits for a challenge that an observation
//! already has in flight and signs for itself; observers only finish a manual
//! connect whose caller went away.
//!
//! Teardown clears the identity, the persisted principal, the challenge cache
//! and the manual flag before the first await, so no caller can observe a
//! half-disconnected bridge.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::actor::{Actor, RpcTransport, ServiceDescriptor};
use crate::btc::{BtcFacade, BtcProviderKind, BtcProviderState};
use crate::config::ConnectConfig;
use crate::core::chain::Chain;
use crate::core::keys;
use crate::drift::DriftReason;
use crate::error::{ConnectError, ConnectResult};
use crate::identity::{DelegatedIdentity, DelegationChain, SessionKey, SignedDelegation};
use crate::principal::Principal;
use crate::session::{BtcLink, ForcedReason, SessionStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgePhase {
    Idle,
    ProviderConnected,
    ChallengePrepared,
    Signing,
    Authenticated,
}

/// Address-scoped sign-in message issued by the sign-in service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub address: String,
    pub message: String,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRequest {
    pub address: String,
    /// Hex public key of `address`, as reported by the wallet.
    pub public_key: String,
    /// Decoded wallet signature over the challenge message.
    pub signature: Vec<u8>,
    pub session_key: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginResponse {
    pub user_public_key: Vec<u8>,
    pub expiration: DateTime<Utc>,
}

/// Remote sign-in service.
#[async_trait]
pub trait SiwbService: Send + Sync {
    async fn prepare_login(&self, address: &str) -> ConnectResult<Challenge>;
    async fn login(&self, request: &LoginRequest) -> ConnectResult<LoginResponse>;
    async fn get_delegation(
        &self,
        address: &str,
        session_key: &[u8],
        expiration: DateTime<Utc>,
    ) -> ConnectResult<SignedDelegation>;
}

enum ChallengeSlot {
    /// Closes when the prepare finishes or is abandoned.
    InFlight(watch::Receiver<()>),
    Ready(Challenge),
}

#[derive(Default)]
struct BridgeInner {
    challenges: HashMap<String, ChallengeSlot>,
    identity: Option<Arc<DelegatedIdentity>>,
    manual: Option<Instant>,
    signing: bool,
    /// Bumped on failure and teardown; in-flight work from an older epoch is dropped.
    epoch: u64,
}

pub struct CrossChainIdentityBridge {
    config: Arc<ConnectConfig>,
    facade: Arc<BtcFacade>,
    service: Arc<dyn SiwbService>,
    store: Arc<SessionStore>,
    transport: Arc<dyn RpcTransport>,
    inner: Mutex<BridgeInner>,
    phase: watch::Sender<BridgePhase>,
    /// Ticket of the pending `connect()`, 0 when idle.
    busy: AtomicU64,
    tickets: AtomicU64,
}

/// Releases the connect slot unless a teardown already did.
struct ConnectGuard<'a> {
    busy: &'a AtomicU64,
    ticket: u64,
}

impl Drop for ConnectGuard<'_> {
    fn drop(&mut self) {
        let _ = self.busy.compare_exchange(self.ticket, 0, Ordering::SeqCst, Ordering::SeqCst);
    }
}

impl CrossChainIdentityBridge {
    pub fn new(
        config: Arc<ConnectConfig>,
        facade: Arc<BtcFacade>,
        service: Arc<dyn SiwbService>,
        store: Arc<SessionStore>,
        transport: Arc<dyn RpcTransport>,
    ) -> Self {
        let (phase, _) = watch::channel(BridgePhase::Idle);
        Self {
            config,
            facade,
            service,
            store,
            transport,
            inner: Mutex::new(BridgeInner::default()),
            phase,
            busy: AtomicU64::new(0),
            tickets: AtomicU64::new(0),
        }
    }

    pub fn facade(&self) -> &Arc<BtcFacade> {
        &self.facade
    }

    pub fn phase(&self) -> BridgePhase {
        *self.phase.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<BridgePhase> {
        self.phase.subscribe()
    }

    pub fn principal(&self) -> Option<Principal> {
        self.identity().map(|id| id.principal().clone())
    }

    pub fn expired(&self) -> bool {
        self.lock().identity.as_ref().map(|id| id.is_expired_at(Utc::now())).unwrap_or(false)
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst) != 0
    }

    /// True while a manual connect is pending and its TTL has not run out.
    pub fn manual_pending(&self) -> bool {
        self.manual_valid(&mut self.lock())
    }

    /// User-initiated sign-in: connects the provider and drives the flow to
    /// `Authenticated` or an error.
    pub async fn connect(&self, kind: BtcProviderKind) -> ConnectResult<Principal> {
        if let Some(principal) = self.principal() {
            return Ok(principal);
        }
        let ticket = self.tickets.fetch_add(1, Ordering::SeqCst) + 1;
        if self.busy.compare_exchange(0, ticket, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            return Err(ConnectError::Busy(Chain::Bitcoin));
        }
        let _guard = ConnectGuard { busy: &self.busy, ticket };
        let epoch = {
            let mut inner = self.lock();
            inner.manual = Some(Instant::now());
            inner.epoch
        };

        let connected = match self.facade.connect(kind).await {
            Ok(state) if state.network != Some(self.config.btc_network) => Err(ConnectError::InvalidAddress(format!(
                "wallet is on {}, expected {}",
                state.network.map(|n| n.as_str()).unwrap_or("an unknown network"),
                self.config.btc_network.as_str()
            ))),
            other => other,
        };
        if let Err(e) = connected {
            self.fail(&e).await;
            return Err(e);
        }
        if self.lock().epoch != epoch {
            tracing::info!(provider = kind.as_str(), "BTC connect superseded by a disconnect");
            self.facade.disconnect().await;
            return Err(ConnectError::Superseded);
        }
        self.store.storage().set(keys::bitcoin::PROVIDER, kind.as_str())?;
        self.set_phase(BridgePhase::ProviderConnected);

        match self.advance(true).await? {
            Some(principal) => Ok(principal),
            None => Err(ConnectError::NotConnected),
        }
    }

    /// Advance the flow from the facade's current state. Never prompts; it
    /// only signs to finish a manual connect whose caller is gone.
    pub async fn observe(&self) -> ConnectResult<Option<Principal>> {
        self.advance(false).await
    }

    /// Passive restore after a reload: reattach to the provider and adopt the
    /// persisted identity if the wallet still reports the pinned address and
    /// network. A locked wallet keeps the persisted identity for a later
    /// observation to adopt. Never signs.
    pub async fn resume(&self, kind: BtcProviderKind) -> ConnectResult<Option<Principal>> {
        let state = self.facade.reconnect(kind).await?;
        if !state.connected {
            tracing::debug!(provider = kind.as_str(), "BTC provider locked, resuming once it unlocks");
            return Ok(None);
        }
        self.set_phase(BridgePhase::ProviderConnected);

        match self.adopt_persisted(&state) {
            Ok(Some(principal)) => Ok(Some(principal)),
            Ok(None) => {
                self.store.set_disconnected(Chain::Bitcoin);
                Ok(None)
            }
            Err(e) => {
                tracing::warn!(error = %e, "discarding unreadable persisted identity");
                self.store.set_disconnected(Chain::Bitcoin);
                Ok(None)
            }
        }
    }

    pub async fn disconnect(&self) {
        self.teardown(None).await;
    }

    /// Silent teardown after drift; the UI gets a forced-disconnect event.
    pub async fn force_disconnect(&self, reason: DriftReason) {
        self.teardown(Some(ForcedReason::Drift(reason))).await;
    }

    /// Silent teardown after the delegation ran out.
    pub async fn expire(&self) {
        self.teardown(Some(ForcedReason::Expired)).await;
    }

    pub fn create_actor(&self, canister_id: &Principal, descriptor: Arc<ServiceDescriptor>) -> ConnectResult<Actor> {
        let identity = self.identity().ok_or(ConnectError::NotConnected)?;
        Actor::new(canister_id.clone(), descriptor, identity, self.transport.clone(), self.config.host.clone())
    }

    fn identity(&self) -> Option<Arc<DelegatedIdentity>> {
        self.lock().identity.clone().filter(|id| !id.is_expired_at(Utc::now()))
    }

    async fn advance(&self, driving: bool) -> ConnectResult<Option<Principal>> {
        if let Some(principal) = self.principal() {
            return Ok(Some(principal));
        }
        let state = self.facade.state();
        let (Some(address), Some(public_key)) = (state.address.clone().filter(|_| state.connected), state.public_key.clone())
        else {
            if self.phase() != BridgePhase::Idle {
                self.set_phase(BridgePhase::Idle);
            }
            return Ok(None);
        };
        match self.adopt_persisted(&state) {
            Ok(Some(principal)) => return Ok(Some(principal)),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, "discarding unreadable persisted identity");
                self.store.set_disconnected(Chain::Bitcoin);
            }
        }
        if self.phase() == BridgePhase::Idle {
            self.set_phase(BridgePhase::ProviderConnected);
        }

        let challenge = match self.ensure_challenge(&address, driving).await {
            Ok(Some(challenge)) => challenge,
            Ok(None) => return Ok(None),
            Err(e) if driving || (self.manual_pending() && !self.is_busy()) => {
                self.fail(&e).await;
                return Err(e);
            }
            Err(e) => {
                tracing::warn!(address = %address, error = %e, "SIWB challenge prepare failed");
                return Ok(None);
            }
        };

        {
            let mut inner = self.lock();
            let deferred = !driving && self.is_busy();
            if deferred || !self.manual_valid(&mut inner) || inner.signing || inner.identity.is_some() {
                return Ok(None);
            }
            inner.signing = true;
        }

        match self.sign_in(&address, &public_key, &challenge).await {
            Ok(principal) => Ok(Some(principal)),
            Err(ConnectError::Superseded) => {
                self.lock().signing = false;
                Err(ConnectError::Superseded)
            }
            Err(e) => {
                self.fail(&e).await;
                Err(e)
            }
        }
    }

    /// Adopts the persisted identity when the provider reports the pinned
    /// address and network and the delegation is still valid.
    fn adopt_persisted(&self, state: &BtcProviderState) -> ConnectResult<Option<Principal>> {
        let Some(link) = self.store.link() else {
            return Ok(None);
        };
        if state.address.as_deref() != Some(link.address.as_str()) || state.network != Some(link.network) {
            return Ok(None);
        }
        let Some(raw) = self.store.storage().get(keys::bitcoin::IDENTITY)? else {
            return Ok(None);
        };
        let identity = DelegatedIdentity::from_json(&raw)?;
        if identity.is_expired_at(Utc::now()) {
            return Ok(None);
        }

        let principal = identity.principal().clone();
        self.store.set_connected(Chain::Bitcoin, principal.clone(), identity.expiration())?;
        {
            let mut inner = self.lock();
            inner.identity = Some(Arc::new(identity));
            inner.manual = None;
            inner.challenges.clear();
        }
        self.set_phase(BridgePhase::Authenticated);
        tracing::info!(principal = %principal, "SIWB session resumed");
        Ok(Some(principal))
    }

    /// Returns the cached challenge for `address`, preparing one if needed.
    /// With `wait`, a prepare already in flight is awaited instead of
    /// reported as `None`.
    async fn ensure_challenge(&self, address: &str, wait: bool) -> ConnectResult<Option<Challenge>> {
        let (epoch, done) = loop {
            let (epoch, mut pending) = {
                let mut inner = self.lock();
                let pending = match inner.challenges.get(address) {
                    Some(ChallengeSlot::Ready(challenge)) => return Ok(Some(challenge.clone())),
                    Some(ChallengeSlot::InFlight(pending)) if pending.has_changed().is_ok() => {
                        if !wait {
                            return Ok(None);
                        }
                        Some(pending.clone())
                    }
                    _ => None,
                };
                if pending.is_none() {
                    let (done, pending) = watch::channel(());
                    inner.challenges.insert(address.to_string(), ChallengeSlot::InFlight(pending));
                    break (inner.epoch, done);
                }
                (inner.epoch, pending)
            };
            if let Some(pending) = pending.as_mut() {
                let _ = pending.changed().await;
            }
            if self.lock().epoch != epoch {
                return Ok(None);
            }
        };

        let prepared = self.service.prepare_login(address).await;

        let mut inner = self.lock();
        if inner.epoch != epoch {
            return Ok(None);
        }
        let result = match prepared {
            Ok(challenge) => {
                inner.challenges.insert(address.to_string(), ChallengeSlot::Ready(challenge.clone()));
                drop(inner);
                tracing::debug!(address, "SIWB challenge prepared");
                self.set_phase(BridgePhase::ChallengePrepared);
                Ok(Some(challenge))
            }
            Err(e) => {
                inner.challenges.remove(address);
                drop(inner);
                Err(e)
            }
        };
        drop(done);
        result
    }

    async fn sign_in(&self, address: &str, public_key: &str, challenge: &Challenge) -> ConnectResult<Principal> {
        let epoch = self.lock().epoch;
        self.set_phase(BridgePhase::Signing);

        let session_key = SessionKey::generate();
        let encoded = self.facade.sign_message(&challenge.message).await?;
        let signature = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| ConnectError::Exchange(format!("wallet signature is not base64: {e}")))?;

        let request = LoginRequest {
            address: address.to_string(),
            public_key: public_key.to_string(),
            signature,
            session_key: session_key.public_key(),
        };
        let login = self.service.login(&request).await?;
        let delegation = self
            .service
            .get_delegation(address, &request.session_key, login.expiration)
            .await?;
        let identity = DelegatedIdentity::new(
            session_key,
            DelegationChain { user_public_key: login.user_public_key, delegations: vec![delegation] },
        )?;

        self.commit(epoch, address, identity)
    }

    /// Adopts the identity only if nothing changed while signing.
    fn commit(&self, epoch: u64, address: &str, identity: DelegatedIdentity) -> ConnectResult<Principal> {
        let state = self.facade.state();
        if self.lock().epoch != epoch || self.facade.get_address().as_deref() != Some(address) {
            tracing::info!(address, "discarding sign-in for a stale address");
            return Err(ConnectError::Superseded);
        }
        let network = state.network.ok_or(ConnectError::NotConnected)?;
        let principal = identity.principal().clone();
        if !principal.is_authenticated() {
            return Err(ConnectError::InvalidPrincipal(principal.to_text()));
        }

        self.store.set_link(BtcLink { address: address.to_string(), network })?;
        self.store.storage().set(keys::bitcoin::IDENTITY, &identity.to_json()?)?;
        if let Some(kind) = state.kind {
            self.store.storage().set(keys::bitcoin::PROVIDER, kind.as_str())?;
        }
        self.store.set_connected(Chain::Bitcoin, principal.clone(), identity.expiration())?;

        {
            let mut inner = self.lock();
            inner.identity = Some(Arc::new(identity));
            inner.manual = None;
            inner.signing = false;
            inner.challenges.remove(address);
        }
        self.set_phase(BridgePhase::Authenticated);
        tracing::info!(principal = %principal, address, "SIWB authenticated");
        Ok(principal)
    }

    /// Failure edge: back to Idle with the error left for the caller to show.
    async fn fail(&self, error: &ConnectError) {
        tracing::info!(error = %error, "SIWB flow failed, resetting");
        {
            let mut inner = self.lock();
            inner.manual = None;
            inner.signing = false;
            inner.challenges.clear();
            inner.epoch += 1;
        }
        if let Err(e) = self.store.storage().remove(keys::bitcoin::PROVIDER) {
            tracing::warn!(error = %e, "failed to clear persisted BTC provider");
        }
        self.set_phase(BridgePhase::Idle);
        self.facade.disconnect().await;
    }

    async fn teardown(&self, reason: Option<ForcedReason>) {
        self.busy.store(0, Ordering::SeqCst);
        {
            let mut inner = self.lock();
            inner.identity = None;
            inner.manual = None;
            inner.signing = false;
            inner.challenges.clear();
            inner.epoch += 1;
        }
        match reason {
            Some(reason) => self.store.force_disconnected(Chain::Bitcoin, reason),
            None => self.store.set_disconnected(Chain::Bitcoin),
        }
        if let Err(e) = self.store.storage().remove(keys::bitcoin::PROVIDER) {
            tracing::warn!(error = %e, "failed to clear persisted BTC provider");
        }
        self.set_phase(BridgePhase::Idle);
        self.facade.disconnect().await;
    }

    fn manual_valid(&self, inner: &mut BridgeInner) -> bool {
        match inner.manual {
            Some(at) if at.elapsed() < self.config.manual_connect_ttl => true,
            Some(_) => {
                tracing::debug!("manual connect flag expired");
                inner.manual = None;
                false
            }
            None => false,
        }
    }

    fn set_phase(&self, phase: BridgePhase) {
        self.phase.send_replace(phase);
    }

    fn lock(&self) -> MutexGuard<'_, BridgeInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

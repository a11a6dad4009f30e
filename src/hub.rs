//! SessionHub - the application-facing surface over both chains.
//!
//! Owns the session store, the ledger `ConnectionManager` and the SIWB
//! bridge, all sharing one storage backend. UI code talks to this type and
//! subscribes to the store; it never mutates sessions directly.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::actor::{Actor, ServiceDescriptor};
use crate::bootstrap::{reconnect_on_load, Restored};
use crate::btc::{BtcFacade, BtcProviderKind};
use crate::config::ConnectConfig;
use crate::connector::{ConnectionStatus, ConnectorType};
use crate::core::chain::Chain;
use crate::error::ConnectResult;
use crate::manager::{ConnectionManager, ConnectorHandle, LedgerBackends};
use crate::principal::Principal;
use crate::runtime::Shutdown;
use crate::session::SessionStore;
use crate::siwb::{CrossChainIdentityBridge, SiwbService};
use crate::storage::SessionStorage;
use crate::watcher::SessionWatcher;

/// A wallet the user can pick, on either chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "chain", content = "provider", rename_all = "lowercase")]
pub enum Provider {
    Ledger(ConnectorType),
    Bitcoin(BtcProviderKind),
}

impl Provider {
    pub fn chain(&self) -> Chain {
        match self {
            Provider::Ledger(_) => Chain::Ledger,
            Provider::Bitcoin(_) => Chain::Bitcoin,
        }
    }
}

pub struct SessionHub {
    config: Arc<ConnectConfig>,
    store: Arc<SessionStore>,
    manager: Arc<ConnectionManager>,
    bridge: Arc<CrossChainIdentityBridge>,
}

impl SessionHub {
    pub fn new(
        config: ConnectConfig,
        storage: Arc<dyn SessionStorage>,
        backends: LedgerBackends,
        facade: BtcFacade,
        siwb: Arc<dyn SiwbService>,
    ) -> Self {
        let config = Arc::new(config);
        let store = Arc::new(SessionStore::new(storage));
        let transport = backends.transport.clone();
        let manager = Arc::new(ConnectionManager::new(config.clone(), backends, store.clone()));
        let bridge = Arc::new(CrossChainIdentityBridge::new(
            config.clone(),
            Arc::new(facade),
            siwb,
            store.clone(),
            transport,
        ));
        Self { config, store, manager, bridge }
    }

    pub fn store(&self) -> &Arc<SessionStore> { &self.store }
    pub fn manager(&self) -> &Arc<ConnectionManager> { &self.manager }
    pub fn bridge(&self) -> &Arc<CrossChainIdentityBridge> { &self.bridge }

    /// Read-only accessor for remote-call sites.
    pub fn connector_handle(&self) -> ConnectorHandle {
        self.manager.handle()
    }

    pub async fn reconnect_on_load(&self) -> Restored {
        reconnect_on_load(&self.manager, &self.bridge).await
    }

    pub fn spawn_watcher(&self, shutdown: &Shutdown) -> JoinHandle<()> {
        SessionWatcher::new(self.manager.clone(), self.bridge.clone(), self.config.watch_interval)
            .spawn(shutdown.subscribe())
    }

    pub async fn connect(&self, provider: Provider) -> ConnectResult<ConnectionStatus> {
        match provider {
            Provider::Ledger(kind) => self.manager.connect(kind).await,
            Provider::Bitcoin(kind) => {
                let principal = self.bridge.connect(kind).await?;
                let expires_at = self.store.session(Chain::Bitcoin).expires_at();
                Ok(ConnectionStatus::connected(principal, expires_at))
            }
        }
    }

    pub async fn disconnect(&self, chain: Chain) {
        match chain {
            Chain::Ledger => self.manager.disconnect().await,
            Chain::Bitcoin => self.bridge.disconnect().await,
        }
    }

    pub async fn is_connected(&self, chain: Chain) -> ConnectionStatus {
        match chain {
            Chain::Ledger => self.manager.is_connected().await,
            Chain::Bitcoin => match self.bridge.principal() {
                Some(principal) if self.store.is_connected(Chain::Bitcoin) => {
                    ConnectionStatus::connected(principal, self.store.session(Chain::Bitcoin).expires_at())
                }
                _ => ConnectionStatus::disconnected(),
            },
        }
    }

    pub async fn create_actor(
        &self,
        chain: Chain,
        canister_id: &Principal,
        descriptor: Arc<ServiceDescriptor>,
    ) -> ConnectResult<Actor> {
        match chain {
            Chain::Ledger => self.manager.create_actor(canister_id, descriptor).await,
            Chain::Bitcoin => self.bridge.create_actor(canister_id, descriptor),
        }
    }
}

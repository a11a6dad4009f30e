//! ConnectionManager - owns the single live ledger connector.
//!
//! # Ownership
//!
//! ```text
//! ConnectionManager ──writes──▶ ConnectorHandle (Arc<RwLock<Option<Arc<dyn Connector>>>>)
//!        │                             ▲
//!        │                             └── read by every remote-call site (create_actor)
//!        └──syncs──▶ SessionStore (Chain::Ledger)
//! ```
//!
//! The live reference is swapped in one synchronous step once the new
//! connector has initialized, so readers never see a half-built connector.
//! `connect()` is not reentrant: a second call while one is
//! pending fails with `Busy`, and a completion that arrives after a
//! `disconnect()`, a newer connect or a connector switch is discarded as
//! `Superseded`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::actor::{Actor, RpcTransport, ServiceDescriptor};
use crate::config::ConnectConfig;
use crate::connector::{
    AuthClient, ConnectionStatus, Connector, ConnectorContext, ConnectorType, DelegatedIdentityConnector,
    InjectedConnector, InjectedWallet, RemoteSignerConnector, SignerTransport,
};
use crate::core::chain::Chain;
use crate::core::keys;
use crate::error::{ConnectError, ConnectResult};
use crate::principal::Principal;
use crate::session::{ForcedReason, SessionStore};

/// External clients the connector variants are built from. A missing backend
/// means the matching wallet is not available in this environment.
#[derive(Clone)]
pub struct LedgerBackends {
    pub auth_client: Option<Arc<dyn AuthClient>>,
    pub injected: Option<Arc<dyn InjectedWallet>>,
    pub signer: Option<Arc<dyn SignerTransport>>,
    pub transport: Arc<dyn RpcTransport>,
}

impl LedgerBackends {
    pub fn new(transport: Arc<dyn RpcTransport>) -> Self {
        Self { auth_client: None, injected: None, signer: None, transport }
    }

    pub fn with_auth_client(mut self, client: Arc<dyn AuthClient>) -> Self {
        self.auth_client = Some(client);
        self
    }

    pub fn with_injected(mut self, wallet: Arc<dyn InjectedWallet>) -> Self {
        self.injected = Some(wallet);
        self
    }

    pub fn with_signer(mut self, transport: Arc<dyn SignerTransport>) -> Self {
        self.signer = Some(transport);
        self
    }

    pub fn is_available(&self, kind: ConnectorType) -> bool {
        match kind {
            ConnectorType::InternetIdentity => self.auth_client.is_some(),
            ConnectorType::Plug => self.injected.is_some(),
            ConnectorType::Oisy => self.signer.is_some(),
        }
    }
}

/// Read side of the live connector reference. Cheap to clone; hand it to
/// anything that needs actors without giving it the manager.
#[derive(Clone, Default)]
pub struct ConnectorHandle {
    live: Arc<RwLock<Option<Arc<dyn Connector>>>>,
}

impl ConnectorHandle {
    pub fn current(&self) -> Option<Arc<dyn Connector>> {
        self.live.read().ok()?.clone()
    }

    pub fn kind(&self) -> Option<ConnectorType> {
        self.current().map(|c| c.kind())
    }

    /// Fails with `NotConnected` when no connector is live.
    pub async fn create_actor(&self, canister_id: &Principal, descriptor: Arc<ServiceDescriptor>) -> ConnectResult<Actor> {
        let connector = self.current().ok_or(ConnectError::NotConnected)?;
        connector.create_actor(canister_id, descriptor).await
    }

    fn replace(&self, next: Option<Arc<dyn Connector>>) -> Option<Arc<dyn Connector>> {
        match self.live.write() {
            Ok(mut live) => std::mem::replace(&mut *live, next),
            Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), next),
        }
    }
}

pub struct ConnectionManager {
    ctx: ConnectorContext,
    backends: LedgerBackends,
    store: Arc<SessionStore>,
    live: ConnectorHandle,
    busy: Arc<AtomicBool>,
    generation: Arc<AtomicU64>,
}

/// Clears the busy flag unless a newer operation already took over.
struct BusyGuard {
    busy: Arc<AtomicBool>,
    generation: Arc<AtomicU64>,
    owner: u64,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        if self.generation.load(Ordering::SeqCst) == self.owner {
            self.busy.store(false, Ordering::SeqCst);
        }
    }
}

impl ConnectionManager {
    pub fn new(config: Arc<ConnectConfig>, backends: LedgerBackends, store: Arc<SessionStore>) -> Self {
        let ctx = ConnectorContext {
            config,
            storage: store.storage().clone(),
            transport: backends.transport.clone(),
        };
        Self {
            ctx,
            backends,
            store,
            live: ConnectorHandle::default(),
            busy: Arc::new(AtomicBool::new(false)),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn handle(&self) -> ConnectorHandle {
        self.live.clone()
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn current(&self) -> Option<Arc<dyn Connector>> {
        self.live.current()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Makes `kind` the live connector. Reuses the live instance when it
    /// already matches. Replacing the live connector supersedes any pending
    /// `connect()` and disconnects the previous connector.
    pub async fn init(&self, kind: ConnectorType) -> ConnectResult<Arc<dyn Connector>> {
        self.activate(kind, None).await
    }

    pub async fn connect(&self, kind: ConnectorType) -> ConnectResult<ConnectionStatus> {
        if self.busy.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            return Err(ConnectError::Busy(Chain::Ledger));
        }
        let owner = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = BusyGuard { busy: self.busy.clone(), generation: self.generation.clone(), owner };

        let connector = self.activate(kind, Some(owner)).await?;
        let result = connector.connect().await;
        if !self.owns(owner, &connector) {
            tracing::info!(connector = kind.as_str(), "discarding superseded connect result");
            return Err(ConnectError::Superseded);
        }

        let status = match result {
            Ok(status) => status,
            Err(e) => {
                tracing::info!(connector = kind.as_str(), error = %e, "connect failed");
                self.store.set_disconnected(Chain::Ledger);
                return Err(e);
            }
        };
        let principal = match status.principal.clone() {
            Some(principal) if status.connected && principal.is_authenticated() => principal,
            other => {
                self.store.set_disconnected(Chain::Ledger);
                return Err(ConnectError::InvalidPrincipal(
                    other.map(|p| p.to_text()).unwrap_or_else(|| "none".into()),
                ));
            }
        };
        self.store.set_connected(Chain::Ledger, principal, status.expires_at)?;
        self.store.storage().set(keys::ledger::PROVIDER, kind.as_str())?;
        Ok(status)
    }

    pub async fn disconnect(&self) {
        self.teardown(None).await;
    }

    /// Silent teardown for expiry or drift; emits a forced-disconnect event.
    pub async fn force_disconnect(&self, reason: ForcedReason) {
        self.teardown(Some(reason)).await;
    }

    pub async fn is_connected(&self) -> ConnectionStatus {
        let Some(connector) = self.live.current() else {
            self.store.set_disconnected(Chain::Ledger);
            return ConnectionStatus::disconnected();
        };
        let status = connector.is_connected().await;
        self.sync(status.clone());
        status
    }

    pub async fn create_actor(&self, canister_id: &Principal, descriptor: Arc<ServiceDescriptor>) -> ConnectResult<Actor> {
        self.live.create_actor(canister_id, descriptor).await
    }

    pub fn expired(&self) -> bool {
        self.live
            .current()
            .filter(|c| c.capabilities().expiring)
            .is_some_and(|c| c.expired())
    }

    async fn teardown(&self, reason: Option<ForcedReason>) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.busy.store(false, Ordering::SeqCst);

        let previous = self.live.replace(None);
        match reason {
            Some(reason) => self.store.force_disconnected(Chain::Ledger, reason),
            None => self.store.set_disconnected(Chain::Ledger),
        }
        if let Err(e) = self.store.storage().remove(keys::ledger::PROVIDER) {
            tracing::warn!(error = %e, "failed to clear persisted ledger provider");
        }
        if let Some(connector) = previous {
            connector.disconnect().await;
        }
    }

    /// Builds and initializes `kind`, then swaps it in. `owner` is the
    /// generation of the `connect()` driving the switch; without one the switch
    /// itself starts a new generation.
    async fn activate(&self, kind: ConnectorType, owner: Option<u64>) -> ConnectResult<Arc<dyn Connector>> {
        if let Some(live) = self.live.current().filter(|c| c.kind() == kind) {
            return Ok(live);
        }
        let connector = self.build(kind)?;
        connector.init().await?;
        if let Some(owner) = owner {
            if self.generation.load(Ordering::SeqCst) != owner {
                return Err(ConnectError::Superseded);
            }
        }

        let previous = self.live.replace(Some(connector.clone()));
        if let Some(previous) = previous {
            tracing::info!(from = previous.kind().as_str(), to = kind.as_str(), "switching ledger connector");
            if owner.is_none() {
                self.generation.fetch_add(1, Ordering::SeqCst);
                self.busy.store(false, Ordering::SeqCst);
            }
            self.store.set_disconnected(Chain::Ledger);
            if let Err(e) = self.store.storage().remove(keys::ledger::PROVIDER) {
                tracing::warn!(error = %e, "failed to clear persisted ledger provider");
            }
            previous.disconnect().await;
        }
        self.sync(connector.is_connected().await);
        Ok(connector)
    }

    /// True while `connector` is still the live one and no newer operation
    /// started since generation `owner`.
    fn owns(&self, owner: u64, connector: &Arc<dyn Connector>) -> bool {
        self.generation.load(Ordering::SeqCst) == owner
            && self.live.current().is_some_and(|live| Arc::ptr_eq(&live, connector))
    }

    fn sync(&self, status: ConnectionStatus) {
        match status.principal {
            Some(principal) if status.connected => {
                if let Err(e) = self.store.set_connected(Chain::Ledger, principal, status.expires_at) {
                    tracing::warn!(error = %e, "connector reported an unusable principal");
                    self.store.set_disconnected(Chain::Ledger);
                }
            }
            _ => self.store.set_disconnected(Chain::Ledger),
        }
    }

    fn build(&self, kind: ConnectorType) -> ConnectResult<Arc<dyn Connector>> {
        let unavailable = || ConnectError::ProviderUnavailable {
            provider: kind.name().into(),
            install_url: kind.install_url().map(Into::into),
        };
        let ctx = self.ctx.clone();
        let connector: Arc<dyn Connector> = match kind {
            ConnectorType::InternetIdentity => {
                let client = self.backends.auth_client.clone().ok_or_else(unavailable)?;
                Arc::new(DelegatedIdentityConnector::new(ctx, client))
            }
            ConnectorType::Plug => {
                let wallet = self.backends.injected.clone().ok_or_else(unavailable)?;
                Arc::new(InjectedConnector::new(ctx, wallet))
            }
            ConnectorType::Oisy => {
                let transport = self.backends.signer.clone().ok_or_else(unavailable)?;
                Arc::new(RemoteSignerConnector::new(ctx, transport))
            }
        };
        Ok(connector)
    }
}

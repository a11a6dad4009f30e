//! Injected-provider connector (Plug).
//!
//! The extension's `is_connected` probe can block forever behind an unlock
//! popup that lives outside the page, so every probe is raced against
//! `probe_timeout` and a timeout reads as "not connected". The lock flag is a
//! cheap synchronous read and decides whether `connect` may skip the prompt.
//!
//! The wallet-side disconnect is best effort, so a local `revoked` flag keeps
//! the connector disconnected until the next explicit `connect`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{ConnectionStatus, Connector, ConnectorContext, ConnectorType};
use crate::actor::{Actor, RequestSigner, ServiceDescriptor};
use crate::error::{ConnectError, ConnectResult};
use crate::principal::Principal;
use crate::timeout::with_timeout;

/// The provider object an extension injects into the page.
#[async_trait]
pub trait InjectedWallet: Send + Sync {
    fn is_unlocked(&self) -> bool;
    /// May hang while the extension waits for the user.
    async fn is_connected(&self) -> bool;
    async fn request_connect(&self, whitelist: &[Principal], host: &str) -> ConnectResult<()>;
    async fn principal(&self) -> ConnectResult<Principal>;
    async fn create_agent(&self, whitelist: &[Principal], host: &str) -> ConnectResult<Arc<dyn RequestSigner>>;
    async fn disconnect(&self) -> ConnectResult<()>;
}

#[derive(Clone)]
struct Attached {
    principal: Principal,
    agent: Arc<dyn RequestSigner>,
}

pub struct InjectedConnector {
    ctx: ConnectorContext,
    wallet: Arc<dyn InjectedWallet>,
    session: Mutex<Option<Attached>>,
    revoked: AtomicBool,
}

impl InjectedConnector {
    pub fn new(ctx: ConnectorContext, wallet: Arc<dyn InjectedWallet>) -> Self {
        Self { ctx, wallet, session: Mutex::new(None), revoked: AtomicBool::new(false) }
    }

    async fn probe(&self) -> bool {
        match with_timeout(self.wallet.is_connected(), self.ctx.config.probe_timeout).await {
            Ok(connected) => connected,
            Err(timed_out) => {
                tracing::debug!(after = ?timed_out.after, "injected provider probe timed out");
                false
            }
        }
    }

    fn revoked(&self) -> bool {
        self.revoked.load(Ordering::SeqCst)
    }

    fn attached(&self) -> Option<Attached> {
        self.session.lock().ok()?.clone()
    }

    fn set_session(&self, next: Option<Attached>) {
        if let Ok(mut session) = self.session.lock() {
            *session = next;
        }
    }

    async fn attach(&self) -> ConnectResult<Principal> {
        let principal = self.wallet.principal().await?;
        if !principal.is_authenticated() {
            return Err(ConnectError::InvalidPrincipal(principal.to_text()));
        }
        let agent = self
            .wallet
            .create_agent(&self.ctx.config.whitelist, &self.ctx.config.host)
            .await?;
        if agent.principal() != principal {
            return Err(ConnectError::InvalidPrincipal(agent.principal().to_text()));
        }
        self.set_session(Some(Attached { principal: principal.clone(), agent }));
        Ok(principal)
    }
}

#[async_trait]
impl Connector for InjectedConnector {
    fn kind(&self) -> ConnectorType {
        ConnectorType::Plug
    }

    async fn init(&self) -> ConnectResult<()> {
        if self.revoked() || self.attached().is_some() || !self.probe().await {
            return Ok(());
        }
        if let Err(e) = self.attach().await {
            tracing::info!(error = %e, "injected provider not resumable");
            self.set_session(None);
        }
        Ok(())
    }

    async fn is_connected(&self) -> ConnectionStatus {
        if self.revoked() || !self.probe().await {
            self.set_session(None);
            return ConnectionStatus::disconnected();
        }
        if let Some(attached) = self.attached() {
            return ConnectionStatus::connected(attached.principal, None);
        }
        match self.attach().await {
            Ok(principal) => ConnectionStatus::connected(principal, None),
            Err(_) => ConnectionStatus::disconnected(),
        }
    }

    async fn connect(&self) -> ConnectResult<ConnectionStatus> {
        self.revoked.store(false, Ordering::SeqCst);
        let already_connected = self.wallet.is_unlocked() && self.probe().await;
        if !already_connected {
            tracing::debug!("requesting injected provider consent");
            self.wallet
                .request_connect(&self.ctx.config.whitelist, &self.ctx.config.host)
                .await
                .map_err(|e| {
                    self.set_session(None);
                    e
                })?;
        }
        match self.attach().await {
            Ok(_) if self.revoked() => {
                self.set_session(None);
                Err(ConnectError::Superseded)
            }
            Ok(principal) => {
                tracing::info!(principal = %principal, prompted = !already_connected, "plug connected");
                Ok(ConnectionStatus::connected(principal, None))
            }
            Err(e) => {
                self.set_session(None);
                Err(e)
            }
        }
    }

    async fn disconnect(&self) {
        self.revoked.store(true, Ordering::SeqCst);
        self.set_session(None);
        match with_timeout(self.wallet.disconnect(), self.ctx.config.probe_timeout).await {
            Ok(Err(e)) => tracing::warn!(error = %e, "injected provider disconnect failed"),
            Err(_) => tracing::warn!("injected provider disconnect timed out"),
            Ok(Ok(())) => {}
        }
    }

    async fn create_actor(&self, canister_id: &Principal, descriptor: Arc<ServiceDescriptor>) -> ConnectResult<Actor> {
        let attached = self.attached().ok_or(ConnectError::NotConnected)?;
        Actor::new(
            canister_id.clone(),
            descriptor,
            attached.agent,
            self.ctx.transport.clone(),
            self.ctx.config.host.clone(),
        )
    }

    fn expired(&self) -> bool {
        false
    }
}

//! Delegated-identity connector (Internet Identity).
//!
//! ```text
//! Unauthenticated ──connect──▶ AwaitingConsent ──login ok──▶ Authenticated(identity)
//!        ▲                            │                            │
//!        └────── rejected / error ────┘◀──── TTL elapsed / disconnect
//! ```
//!
//! The persisted expiry timestamp is only a fast pre-check for `expired()`.
//! On resume the auth client decides: if it reports unauthenticated, the
//! connector resets even when the timestamp still looks valid.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{ConnectionStatus, Connector, ConnectorContext, ConnectorType};
use crate::actor::{Actor, ServiceDescriptor};
use crate::core::keys;
use crate::error::{ConnectError, ConnectResult};
use crate::identity::DelegatedIdentity;
use crate::principal::Principal;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginOptions {
    pub identity_provider: String,
    pub max_time_to_live: Duration,
    pub derivation_origin: Option<String>,
}

/// The resumable external auth client (popup flow + its own key storage).
#[async_trait]
pub trait AuthClient: Send + Sync {
    async fn is_authenticated(&self) -> bool;
    async fn identity(&self) -> Option<Arc<DelegatedIdentity>>;
    /// Opens the identity provider and waits for the user.
    async fn login(&self, options: &LoginOptions) -> ConnectResult<()>;
    async fn logout(&self) -> ConnectResult<()>;
}

enum DelegatedState {
    Unauthenticated,
    AwaitingConsent,
    Authenticated(Arc<DelegatedIdentity>),
}

pub struct DelegatedIdentityConnector {
    ctx: ConnectorContext,
    client: Arc<dyn AuthClient>,
    state: Mutex<DelegatedState>,
    initialized: AtomicBool,
}

impl DelegatedIdentityConnector {
    pub fn new(ctx: ConnectorContext, client: Arc<dyn AuthClient>) -> Self {
        Self {
            ctx,
            client,
            state: Mutex::new(DelegatedState::Unauthenticated),
            initialized: AtomicBool::new(false),
        }
    }

    fn login_options(&self) -> LoginOptions {
        LoginOptions {
            identity_provider: self.ctx.config.identity_provider.clone(),
            max_time_to_live: self.ctx.config.max_time_to_live,
            derivation_origin: self.ctx.config.derivation_origin.clone(),
        }
    }

    fn identity(&self) -> Option<Arc<DelegatedIdentity>> {
        match &*self.state.lock().ok()? {
            DelegatedState::Authenticated(identity) if !identity.is_expired_at(Utc::now()) => Some(identity.clone()),
            _ => None,
        }
    }

    fn set_state(&self, next: DelegatedState) {
        if let Ok(mut state) = self.state.lock() {
            *state = next;
        }
    }

    fn reset(&self) {
        self.set_state(DelegatedState::Unauthenticated);
        if let Err(e) = self.ctx.storage.remove(keys::ledger::EXPIRY) {
            tracing::warn!(error = %e, "failed to clear persisted expiry");
        }
    }

    /// Adopts `identity` if it is usable; returns its principal.
    fn authenticate(&self, identity: Arc<DelegatedIdentity>) -> ConnectResult<Principal> {
        let principal = identity.principal().clone();
        if !principal.is_authenticated() {
            return Err(ConnectError::InvalidPrincipal(principal.to_text()));
        }
        if identity.is_expired_at(Utc::now()) {
            return Err(ConnectError::SessionExpired);
        }
        let expires_at = self.persisted_expiry_for(&identity);
        self.ctx.storage.set(keys::ledger::EXPIRY, &expires_at.to_rfc3339())?;
        self.set_state(DelegatedState::Authenticated(identity));
        Ok(principal)
    }

    fn persisted_expiry_for(&self, identity: &DelegatedIdentity) -> DateTime<Utc> {
        let requested = Utc::now() + self.ctx.config.max_time_to_live_chrono();
        identity.expiration().map(|exp| exp.min(requested)).unwrap_or(requested)
    }

    fn persisted_expiry(&self) -> Option<DateTime<Utc>> {
        let raw = self.ctx.storage.get(keys::ledger::EXPIRY).ok()??;
        DateTime::parse_from_rfc3339(&raw).ok().map(|ts| ts.with_timezone(&Utc))
    }
}

#[async_trait]
impl Connector for DelegatedIdentityConnector {
    fn kind(&self) -> ConnectorType {
        ConnectorType::InternetIdentity
    }

    async fn init(&self) -> ConnectResult<()> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if !self.client.is_authenticated().await {
            tracing::debug!("auth client not authenticated, resetting");
            self.reset();
            return Ok(());
        }
        match self.client.identity().await {
            Some(identity) => {
                if let Err(e) = self.authenticate(identity) {
                    tracing::info!(error = %e, "resumed identity unusable, resetting");
                    self.reset();
                }
            }
            None => self.reset(),
        }
        Ok(())
    }

    async fn is_connected(&self) -> ConnectionStatus {
        match self.identity() {
            Some(identity) => ConnectionStatus::connected(identity.principal().clone(), identity.expiration()),
            None => ConnectionStatus::disconnected(),
        }
    }

    async fn connect(&self) -> ConnectResult<ConnectionStatus> {
        if let Some(identity) = self.identity() {
            return Ok(ConnectionStatus::connected(identity.principal().clone(), identity.expiration()));
        }

        self.set_state(DelegatedState::AwaitingConsent);
        if let Err(e) = self.client.login(&self.login_options()).await {
            self.reset();
            return Err(e);
        }

        let Some(identity) = self.client.identity().await else {
            self.reset();
            return Err(ConnectError::Exchange("identity provider returned no identity".into()));
        };
        let expires_at = identity.expiration();
        match self.authenticate(identity) {
            Ok(principal) => {
                tracing::info!(principal = %principal, "internet identity connected");
                Ok(ConnectionStatus::connected(principal, expires_at))
            }
            Err(e) => {
                self.reset();
                if let Err(logout) = self.client.logout().await {
                    tracing::warn!(error = %logout, "auth client logout failed");
                }
                Err(e)
            }
        }
    }

    async fn disconnect(&self) {
        self.reset();
        if let Err(e) = self.client.logout().await {
            tracing::warn!(error = %e, "auth client logout failed");
        }
    }

    async fn create_actor(&self, canister_id: &Principal, descriptor: Arc<ServiceDescriptor>) -> ConnectResult<Actor> {
        let identity = self.identity().ok_or(ConnectError::NotConnected)?;
        Actor::new(
            canister_id.clone(),
            descriptor,
            identity,
            self.ctx.transport.clone(),
            self.ctx.config.host.clone(),
        )
    }

    fn expired(&self) -> bool {
        let now = Utc::now();
        if let Some(expiry) = self.persisted_expiry() {
            if expiry <= now {
                return true;
            }
        }
        match self.state.lock() {
            Ok(state) => matches!(&*state, DelegatedState::Authenticated(identity) if identity.is_expired_at(now)),
            Err(_) => false,
        }
    }
}

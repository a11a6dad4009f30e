//! Connector contract - the capability interface every ledger wallet implements.
//!
//! # Variants
//!
//! | Type | Protocol | Transport | Resumable |
//! |------|----------|-----------|-----------|
//! | `InternetIdentity` | delegated identity | popup + resumable auth client | yes |
//! | `Plug` | injected provider | in-page extension object | probe only |
//! | `Oisy` | remote signer | windowed message channel | no |
//!
//! Dispatch always goes through [`Connector`]; callers never inspect which
//! variant they hold beyond [`Connector::kind`].

mod delegated;
mod injected;
mod remote;

pub use delegated::{AuthClient, DelegatedIdentityConnector, LoginOptions};
pub use injected::{InjectedConnector, InjectedWallet};
pub use remote::{RemoteSignerConnector, SignerAccount, SignerChannel, SignerTransport};

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::actor::{Actor, RpcTransport, ServiceDescriptor};
use crate::config::ConnectConfig;
use crate::error::ConnectResult;
use crate::principal::Principal;
use crate::storage::SessionStorage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorType {
    InternetIdentity,
    Plug,
    Oisy,
}

impl ConnectorType {
    pub const ALL: &'static [ConnectorType] = &[ConnectorType::InternetIdentity, ConnectorType::Plug, ConnectorType::Oisy];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectorType::InternetIdentity => "ii",
            ConnectorType::Plug => "plug",
            ConnectorType::Oisy => "oisy",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ii" | "internetidentity" | "internet-identity" => Some(ConnectorType::InternetIdentity),
            "plug" => Some(ConnectorType::Plug),
            "oisy" => Some(ConnectorType::Oisy),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ConnectorType::InternetIdentity => "Internet Identity",
            ConnectorType::Plug => "Plug",
            ConnectorType::Oisy => "OISY Wallet",
        }
    }

    pub fn install_url(&self) -> Option<&'static str> {
        match self {
            ConnectorType::InternetIdentity => None,
            ConnectorType::Plug => Some("https://plugwallet.ooo"),
            ConnectorType::Oisy => None,
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        match self {
            ConnectorType::InternetIdentity => Capabilities { resumable: true, expiring: true, injected: false, remote_signer: false },
            ConnectorType::Plug => Capabilities { resumable: true, expiring: false, injected: true, remote_signer: false },
            ConnectorType::Oisy => Capabilities { resumable: false, expiring: false, injected: false, remote_signer: true },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// `init()` can reconstruct a session without user interaction.
    pub resumable: bool,
    /// Sessions carry a TTL.
    pub expiring: bool,
    pub injected: bool,
    pub remote_signer: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub principal: Option<Principal>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl ConnectionStatus {
    pub fn disconnected() -> Self { Self::default() }

    pub fn connected(principal: Principal, expires_at: Option<DateTime<Utc>>) -> Self {
        Self { connected: true, principal: Some(principal), expires_at }
    }
}

/// Everything a connector needs from its surroundings.
#[derive(Clone)]
pub struct ConnectorContext {
    pub config: Arc<ConnectConfig>,
    pub storage: Arc<dyn SessionStorage>,
    pub transport: Arc<dyn RpcTransport>,
}

#[async_trait]
pub trait Connector: Send + Sync {
    fn kind(&self) -> ConnectorType;

    fn capabilities(&self) -> Capabilities {
        self.kind().capabilities()
    }

    /// Idempotent capability probe; may resume a session from external client state.
    async fn init(&self) -> ConnectResult<()>;

    async fn is_connected(&self) -> ConnectionStatus;

    /// May prompt the user. Never reports `connected` with an anonymous principal.
    async fn connect(&self) -> ConnectResult<ConnectionStatus>;

    /// Revokes the local session; remote logout is best effort.
    async fn disconnect(&self);

    /// Fails with `NotConnected` instead of degrading to an anonymous caller.
    async fn create_actor(&self, canister_id: &Principal, descriptor: Arc<ServiceDescriptor>) -> ConnectResult<Actor>;

    fn expired(&self) -> bool;
}

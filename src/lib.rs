//! Beeconnect: wallet connectors and cross-chain sessions for a two-ledger front end.
//!
//! # Architecture
//!
//! ```text
//! SessionHub (entry point)
//!   │
//!   ├── ConnectionManager (ledger chain)
//!   │     └── live Connector: InternetIdentity | Plug | Oisy
//!   │           └── create_actor → Actor (signed request executor)
//!   │
//!   ├── CrossChainIdentityBridge (bitcoin chain, SIWB)
//!   │     ├── BtcFacade → Unisat, Xverse, OKX, Leather, ...
//!   │     └── SiwbService (prepare → sign → login → delegation)
//!   │
//!   ├── SessionStore (per-chain sessions, events, persisted keys)
//!   │
//!   └── SessionWatcher (expiry + drift → silent forced disconnect)
//! ```
//!
//! # Surface
//!
//! | Operation | Method | Description |
//! |-----------|--------|-------------|
//! | connect | `hub.connect(provider)` | Consent flow, resolves `{connected, principal}` |
//! | disconnect | `hub.disconnect(chain)` | Local teardown, best-effort remote logout |
//! | isConnected | `hub.is_connected(chain)` | Live status, synced into the store |
//! | createActor | `hub.create_actor(chain, canister, descriptor)` | Fails when not connected |
//! | reload | `hub.reconnect_on_load()` | Replays persisted provider choices |
//!
//! # Features
//!
//! - `native` - file-backed session storage and `tracing-subscriber` setup
//!
//! # Usage
//!
//! ```ignore
//! use beeconnect::{ConnectConfig, ConnectorType, Provider, SessionHub, Shutdown};
//!
//! let hub = SessionHub::new(config, storage, backends, facade, siwb);
//! hub.reconnect_on_load().await;
//! let _watcher = hub.spawn_watcher(&shutdown);
//!
//! let status = hub.connect(Provider::Ledger(ConnectorType::Plug)).await?;
//! let actor = hub.create_actor(Chain::Ledger, &canister, descriptor).await?;
//! ```

pub mod actor;
pub mod bootstrap;
pub mod btc;
pub mod config;
pub mod connector;
pub mod core;
pub mod drift;
pub mod error;
pub mod hub;
pub mod identity;
pub mod manager;
pub mod principal;
pub mod runtime;
pub mod session;
pub mod siwb;
pub mod storage;
pub mod timeout;
pub mod watcher;

#[cfg(feature = "native")]
pub mod logging;

pub use actor::{Actor, CallMode, RequestSigner, RpcTransport, ServiceDescriptor};
pub use bootstrap::{reconnect_on_load, Restored};
pub use btc::{BtcFacade, BtcNetwork, BtcProviderKind, BtcProviderState, BtcWallet};
pub use config::ConnectConfig;
pub use connector::{ConnectionStatus, Connector, ConnectorType};
pub use core::chain::Chain;
pub use drift::{detect_drift, DriftReason};
pub use error::{ConnectError, ConnectResult, TransportError};
pub use hub::{Provider, SessionHub};
pub use identity::DelegatedIdentity;
pub use manager::{ConnectionManager, ConnectorHandle, LedgerBackends};
pub use principal::Principal;
pub use runtime::Shutdown;
pub use session::{Session, SessionEvent, SessionStore};
pub use siwb::{BridgePhase, CrossChainIdentityBridge, SiwbService};
pub use storage::{MemoryStorage, SessionStorage};
pub use watcher::SessionWatcher;

#[cfg(feature = "native")]
pub use logging::init_logging;
#[cfg(feature = "native")]
pub use storage::FileStorage;

//! Reconnect-on-load: replay the persisted provider choices after a reload.
//!
//! Ledger: `ledger.provider` → `init()` the connector, which resumes from its
//! external client. An expired delegation is torn down silently; a connector
//! that fails to init, or whose sessions cannot outlive the page (the remote
//! signer channel), loses its persisted choice.
//!
//! Bitcoin: `bitcoin.provider` → passive `resume()` on the bridge. Never
//! prompts and never signs.

use crate::btc::BtcProviderKind;
use crate::connector::{ConnectionStatus, ConnectorType};
use crate::core::keys;
use crate::manager::ConnectionManager;
use crate::principal::Principal;
use crate::session::ForcedReason;
use crate::siwb::CrossChainIdentityBridge;
use crate::storage::SessionStorage;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Restored {
    pub ledger: Option<ConnectionStatus>,
    pub bitcoin: Option<Principal>,
}

pub async fn reconnect_on_load(manager: &ConnectionManager, bridge: &CrossChainIdentityBridge) -> Restored {
    Restored {
        ledger: restore_ledger(manager).await,
        bitcoin: restore_bitcoin(manager, bridge).await,
    }
}

async fn restore_ledger(manager: &ConnectionManager) -> Option<ConnectionStatus> {
    let storage = manager.store().storage().clone();
    let raw = match storage.get(keys::ledger::PROVIDER) {
        Ok(raw) => raw?,
        Err(e) => {
            tracing::warn!(error = %e, "failed to read persisted ledger provider");
            return None;
        }
    };
    let Some(kind) = ConnectorType::from_str(&raw) else {
        tracing::warn!(provider = %raw, "unknown persisted ledger provider");
        forget(storage.as_ref(), keys::ledger::PROVIDER);
        return None;
    };

    if !kind.capabilities().resumable {
        tracing::debug!(connector = kind.as_str(), "ledger connector does not survive a reload");
        forget(storage.as_ref(), keys::ledger::PROVIDER);
        return None;
    }

    if let Err(e) = manager.init(kind).await {
        tracing::info!(connector = kind.as_str(), error = %e, "persisted ledger connector unavailable");
        forget(storage.as_ref(), keys::ledger::PROVIDER);
        return None;
    }
    if manager.expired() {
        tracing::info!(connector = kind.as_str(), "persisted ledger session expired");
        manager.force_disconnect(ForcedReason::Expired).await;
        return None;
    }

    let status = manager.is_connected().await;
    tracing::debug!(connector = kind.as_str(), connected = status.connected, "ledger session restored");
    Some(status)
}

async fn restore_bitcoin(manager: &ConnectionManager, bridge: &CrossChainIdentityBridge) -> Option<Principal> {
    let storage = manager.store().storage().clone();
    let raw = match storage.get(keys::bitcoin::PROVIDER) {
        Ok(raw) => raw?,
        Err(e) => {
            tracing::warn!(error = %e, "failed to read persisted BTC provider");
            return None;
        }
    };
    let Some(kind) = BtcProviderKind::from_str(&raw) else {
        tracing::warn!(provider = %raw, "unknown persisted BTC provider");
        forget(storage.as_ref(), keys::bitcoin::PROVIDER);
        return None;
    };
    match bridge.resume(kind).await {
        Ok(principal) => principal,
        Err(e) => {
            tracing::info!(provider = kind.as_str(), error = %e, "BTC session not resumable");
            None
        }
    }
}

fn forget(storage: &dyn SessionStorage, key: &str) {
    if let Err(e) = storage.remove(key) {
        tracing::warn!(key, error = %e, "failed to clear persisted provider");
    }
}

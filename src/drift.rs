//! Drift detection - the wallet changed underneath the session.
//!
//! Checks run in a fixed order and the first match wins:
//!
//! 1. provider reports fully disconnected
//! 2. selected address differs from the pinned address
//! 3. network differs from the pinned network
//!
//! Only a connected session can drift.

use std::fmt;

use crate::btc::BtcProviderState;
use crate::session::BtcLink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftReason {
    ProviderDisconnected,
    AddressChanged,
    NetworkChanged,
}

impl fmt::Display for DriftReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DriftReason::ProviderDisconnected => "provider disconnected",
            DriftReason::AddressChanged => "address changed",
            DriftReason::NetworkChanged => "network changed",
        })
    }
}

pub fn detect_drift(
    session_connected: bool,
    link: Option<&BtcLink>,
    provider: &BtcProviderState,
) -> Option<DriftReason> {
    if !session_connected {
        return None;
    }
    if !provider.connected {
        return Some(DriftReason::ProviderDisconnected);
    }
    let link = link?;
    if provider.address.as_deref() != Some(link.address.as_str()) {
        return Some(DriftReason::AddressChanged);
    }
    if provider.network != Some(link.network) {
        return Some(DriftReason::NetworkChanged);
    }
    None
}

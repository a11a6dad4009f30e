//! Error types for connectors, the session manager and the SIWB bridge.
//!
//! Nothing here is retried automatically. Every variant is either surfaced to
//! the user (who retries by calling `connect()` again) or, for
//! [`ConnectError::SessionExpired`] and [`ConnectError::DriftDetected`],
//! resolved by a silent forced disconnect.

use std::time::Duration;

use thiserror::Error;

use crate::core::chain::Chain;
use crate::drift::DriftReason;

pub type ConnectResult<T> = Result<T, ConnectError>;

#[derive(Debug, Error)]
pub enum ConnectError {
    /// Extension or app not installed. User-recoverable, never auto-retried.
    #[error("{provider} is not installed")]
    ProviderUnavailable {
        provider: String,
        install_url: Option<String>,
    },

    #[error("request was rejected in the wallet")]
    ConsentRejected,

    /// An external party (popup, extension, signer window) never answered.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("session expired")]
    SessionExpired,

    #[error("wallet state drifted: {0}")]
    DriftDetected(DriftReason),

    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    #[error("not connected")]
    NotConnected,

    #[error("a connect sequence is already running on the {0} chain")]
    Busy(Chain),

    /// A connect attempt finished after a newer connect or disconnect was issued.
    #[error("superseded by a newer session request")]
    Superseded,

    #[error("sign-in exchange failed: {0}")]
    Exchange(String),

    #[error("invalid principal: {0}")]
    InvalidPrincipal(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("unknown method '{method}' on service {service}")]
    UnknownMethod { service: String, method: String },

    #[error("remote call rejected: {0}")]
    Rejected(String),

    #[error("storage: {0}")]
    Storage(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("signer channel failed: {0}")]
    Channel(String),

    #[error("signer returned no accounts")]
    NoAccounts,

    #[error("signer returned an anonymous account")]
    AnonymousAccount,

    #[error("signer channel closed")]
    Closed,
}

impl ConnectError {
    /// Silent errors tear the session down without showing anything.
    pub fn is_silent(&self) -> bool {
        matches!(self, ConnectError::SessionExpired | ConnectError::DriftDetected(_))
    }

    /// Message shown to the user, with install link where there is one.
    pub fn user_message(&self) -> String {
        match self {
            ConnectError::ProviderUnavailable { provider, install_url: Some(url) } => {
                format!("{provider} is not installed. Install it from {url} and reload the page.")
            }
            ConnectError::ProviderUnavailable { provider, install_url: None } => {
                format!("{provider} is not installed.")
            }
            ConnectError::ConsentRejected => "The request was rejected in your wallet.".into(),
            ConnectError::Timeout { .. } => {
                "Your wallet did not respond. Unlock it and try again.".into()
            }
            ConnectError::Busy(_) => "A wallet connection is already in progress.".into(),
            other => other.to_string(),
        }
    }
}

impl From<serde_json::Error> for ConnectError {
    fn from(e: serde_json::Error) -> Self {
        ConnectError::Storage(format!("json: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_link_in_user_message() {
        let err = ConnectError::ProviderUnavailable {
            provider: "Unisat".into(),
            install_url: Some("https://unisat.io/download".into()),
        };
        assert!(err.user_message().contains("https://unisat.io/download"));
        assert!(!err.is_silent());
    }

    #[test]
    fn expiry_and_drift_are_silent() {
        assert!(ConnectError::SessionExpired.is_silent());
        assert!(ConnectError::DriftDetected(DriftReason::ProviderDisconnected).is_silent());
        assert!(!ConnectError::ConsentRejected.is_silent());
    }

    #[test]
    fn transport_error_converts() {
        let err: ConnectError = TransportError::NoAccounts.into();
        assert!(matches!(err, ConnectError::Transport(TransportError::NoAccounts)));
    }
}

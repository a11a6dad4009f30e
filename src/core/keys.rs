//! Persisted storage keys.
//!
//! Centralized so bootstrap, manager and bridge agree on the layout.

/// Ledger-chain keys
pub mod ledger {
    /// Last connected `ConnectorType`.
    pub const PROVIDER: &str = "ledger.provider";
    /// RFC 3339 expiry of the delegated identity. A fast pre-check only.
    pub const EXPIRY: &str = "ledger.expiry";
}

/// Bitcoin-chain keys
pub mod bitcoin {
    /// Last connected `BtcProviderKind`.
    pub const PROVIDER: &str = "bitcoin.provider";
    pub const ADDRESS: &str = "bitcoin.address";
    pub const NETWORK: &str = "bitcoin.network";
    pub const PRINCIPAL: &str = "bitcoin.principal";
    /// Serialized delegated identity obtained through SIWB.
    pub const IDENTITY: &str = "bitcoin.identity";

    pub const SESSION: &[&str] = &[ADDRESS, NETWORK, PRINCIPAL, IDENTITY];
}

//! Connection configuration - passed from the application shell

use std::time::Duration;

use crate::btc::BtcNetwork;
use crate::principal::Principal;

pub const DEFAULT_IDENTITY_PROVIDER: &str = "https://identity.ic0.app";
pub const DEFAULT_HOST: &str = "https://icp-api.io";

/// Connection configuration. The application shell constructs this.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    pub app: String,
    /// Boundary node the signed requests are sent to.
    pub host: String,
    pub identity_provider: String,
    pub derivation_origin: Option<String>,
    /// Lifetime requested for delegated identities.
    pub max_time_to_live: Duration,
    /// Canisters an injected wallet is asked to sign for.
    pub whitelist: Vec<Principal>,
    /// Deadline for injected-provider connectivity probes.
    pub probe_timeout: Duration,
    pub signer_establish_timeout: Duration,
    pub signer_disconnect_timeout: Duration,
    /// How long a user-initiated BTC connect may wait before signing is no longer allowed.
    pub manual_connect_ttl: Duration,
    /// Period of the expiry/provider poll in the session watcher.
    pub watch_interval: Duration,
    pub btc_network: BtcNetwork,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            app: "beeconnect".into(),
            host: DEFAULT_HOST.into(),
            identity_provider: DEFAULT_IDENTITY_PROVIDER.into(),
            derivation_origin: None,
            max_time_to_live: Duration::from_secs(7 * 24 * 60 * 60),
            whitelist: Vec::new(),
            probe_timeout: Duration::from_secs(2),
            signer_establish_timeout: Duration::from_secs(10),
            signer_disconnect_timeout: Duration::from_secs(2),
            manual_connect_ttl: Duration::from_secs(5 * 60),
            watch_interval: Duration::from_secs(30),
            btc_network: BtcNetwork::default(),
        }
    }
}

impl ConnectConfig {
    pub fn new(app: impl Into<String>) -> Self {
        Self { app: app.into(), ..Default::default() }
    }
    pub fn with_host(mut self, host: impl Into<String>) -> Self { self.host = host.into(); self }
    pub fn with_identity_provider(mut self, url: impl Into<String>) -> Self { self.identity_provider = url.into(); self }
    pub fn with_derivation_origin(mut self, origin: impl Into<String>) -> Self { self.derivation_origin = Some(origin.into()); self }
    pub fn with_max_time_to_live(mut self, ttl: Duration) -> Self { self.max_time_to_live = ttl; self }
    pub fn with_whitelist(mut self, canisters: Vec<Principal>) -> Self { self.whitelist = canisters; self }
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self { self.probe_timeout = timeout; self }
    pub fn with_signer_timeouts(mut self, establish: Duration, disconnect: Duration) -> Self {
        self.signer_establish_timeout = establish;
        self.signer_disconnect_timeout = disconnect;
        self
    }
    pub fn with_manual_connect_ttl(mut self, ttl: Duration) -> Self { self.manual_connect_ttl = ttl; self }
    pub fn with_watch_interval(mut self, interval: Duration) -> Self { self.watch_interval = interval; self }
    pub fn with_btc_network(mut self, network: BtcNetwork) -> Self { self.btc_network = network; self }

    pub(crate) fn max_time_to_live_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.max_time_to_live).unwrap_or_else(|_| chrono::Duration::days(7))
    }
}

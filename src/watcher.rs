//! SessionWatcher - the observation loop behind silent forced disconnects.
//!
//! ```text
//! tokio::select!
//!   ├── shutdown          → stop
//!   ├── provider changed  → evaluate()
//!   └── interval elapsed  → poll()   (refresh provider, then evaluate)
//! ```
//!
//! Each evaluation checks the ledger session for expiry, the Bitcoin session
//! for expiry and drift, and otherwise lets the SIWB bridge advance (which is
//! where a pending manual connect gets retried on a stable address).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::core::chain::Chain;
use crate::drift::detect_drift;
use crate::manager::ConnectionManager;
use crate::session::ForcedReason;
use crate::siwb::CrossChainIdentityBridge;

/// `tokio::time::interval` rejects a zero period.
const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// What one evaluation tore down, per chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Observation {
    pub ledger: Option<ForcedReason>,
    pub bitcoin: Option<ForcedReason>,
}

impl Observation {
    pub fn is_quiet(&self) -> bool {
        self.ledger.is_none() && self.bitcoin.is_none()
    }
}

pub struct SessionWatcher {
    manager: Arc<ConnectionManager>,
    bridge: Arc<CrossChainIdentityBridge>,
    interval: Duration,
}

impl SessionWatcher {
    pub fn new(manager: Arc<ConnectionManager>, bridge: Arc<CrossChainIdentityBridge>, interval: Duration) -> Self {
        Self { manager, bridge, interval }
    }

    /// Re-read the active BTC provider, then evaluate.
    pub async fn poll(&self) -> Observation {
        let facade = self.bridge.facade();
        if facade.active_kind().is_some() {
            if let Err(e) = facade.refresh().await {
                tracing::warn!(error = %e, "BTC provider refresh failed");
            }
        }
        self.evaluate().await
    }

    pub async fn evaluate(&self) -> Observation {
        let store = self.manager.store();
        let mut observation = Observation::default();

        if store.is_connected(Chain::Ledger) && self.manager.expired() {
            self.manager.force_disconnect(ForcedReason::Expired).await;
            observation.ledger = Some(ForcedReason::Expired);
        }

        if store.is_connected(Chain::Bitcoin) && self.bridge.expired() {
            self.bridge.expire().await;
            observation.bitcoin = Some(ForcedReason::Expired);
            return observation;
        }

        let provider = self.bridge.facade().state();
        let link = store.link();
        if let Some(reason) = detect_drift(store.is_connected(Chain::Bitcoin), link.as_ref(), &provider) {
            tracing::info!(%reason, "BTC wallet drifted from session");
            self.bridge.force_disconnect(reason).await;
            observation.bitcoin = Some(ForcedReason::Drift(reason));
            return observation;
        }

        if let Err(e) = self.bridge.observe().await {
            tracing::warn!(error = %e, "SIWB observation failed");
        }
        observation
    }

    pub fn spawn(self, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut provider = self.bridge.facade().subscribe();
            let period = self.interval.max(MIN_INTERVAL);
            let mut ticks = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        tracing::debug!("session watcher stopped");
                        break;
                    }
                    changed = provider.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        self.evaluate().await;
                    }
                    _ = ticks.tick() => {
                        self.poll().await;
                    }
                }
            }
        })
    }
}

//! BTC provider facade - one surface over many Bitcoin wallet SDKs.
//!
//! # Architecture
//!
//! ```text
//! BtcFacade
//!     │
//!     ├── registry: detected wallets (BtcProviderKind → dyn BtcWallet)
//!     │
//!     ├── active: the wallet the user picked
//!     │
//!     └── state: watch channel of BtcProviderState
//!                   │
//!                   ▼
//!           SessionWatcher (drift) + CrossChainIdentityBridge (SIWB)
//! ```
//!
//! The bridge and the drift watcher only read from the facade. Provider
//! events (account switched, network switched, wallet locked) surface as new
//! `BtcProviderState` values, either pushed by the SDK glue through
//! [`BtcFacade::refresh`] or picked up by the watcher's poll.

mod provider;

pub use provider::{BtcAccount, BtcNetwork, BtcProviderKind, BtcWallet};

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use bitcoin::address::NetworkUnchecked;
use tokio::sync::watch;

use crate::error::{ConnectError, ConnectResult};

/// What the active provider currently reports.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BtcProviderState {
    pub kind: Option<BtcProviderKind>,
    pub connected: bool,
    pub address: Option<String>,
    pub public_key: Option<String>,
    pub network: Option<BtcNetwork>,
}

impl BtcProviderState {
    fn connected(kind: BtcProviderKind, account: BtcAccount, network: BtcNetwork) -> Self {
        Self {
            kind: Some(kind),
            connected: true,
            address: Some(account.address),
            public_key: Some(account.public_key),
            network: Some(network),
        }
    }

    fn locked(kind: BtcProviderKind) -> Self {
        Self { kind: Some(kind), ..Default::default() }
    }
}

type ActiveWallet = (BtcProviderKind, Arc<dyn BtcWallet>);

pub struct BtcFacade {
    wallets: HashMap<BtcProviderKind, Arc<dyn BtcWallet>>,
    active: Mutex<Option<ActiveWallet>>,
    state: watch::Sender<BtcProviderState>,
}

impl Default for BtcFacade {
    fn default() -> Self { Self::new() }
}

impl BtcFacade {
    pub fn new() -> Self {
        let (state, _) = watch::channel(BtcProviderState::default());
        Self { wallets: HashMap::new(), active: Mutex::new(None), state }
    }

    /// Register a wallet the page detected.
    pub fn with_wallet(mut self, kind: BtcProviderKind, wallet: Arc<dyn BtcWallet>) -> Self {
        self.wallets.insert(kind, wallet);
        self
    }

    pub fn is_installed(&self, kind: BtcProviderKind) -> bool {
        self.wallets.contains_key(&kind)
    }

    pub fn detected(&self) -> Vec<BtcProviderKind> {
        let mut kinds: Vec<_> = self.wallets.keys().copied().collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }

    pub fn state(&self) -> BtcProviderState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<BtcProviderState> {
        self.state.subscribe()
    }

    pub fn active_kind(&self) -> Option<BtcProviderKind> {
        self.active.lock().ok()?.as_ref().map(|(kind, _)| *kind)
    }

    pub fn get_address(&self) -> Option<String> {
        let state = self.state.borrow();
        state.connected.then(|| state.address.clone()).flatten()
    }

    pub fn get_public_key(&self) -> Option<String> {
        let state = self.state.borrow();
        state.connected.then(|| state.public_key.clone()).flatten()
    }

    /// User-initiated: may prompt the wallet for consent.
    pub async fn connect(&self, kind: BtcProviderKind) -> ConnectResult<BtcProviderState> {
        let wallet = self.wallet(kind)?;
        let account = wallet.request_accounts().await?;
        let network = wallet.network().await?;
        validate_address(&account.address, network)?;

        self.set_active(kind, wallet)?;
        let state = BtcProviderState::connected(kind, account, network);
        tracing::info!(provider = kind.as_str(), address = ?state.address, network = network.as_str(), "BTC provider connected");
        self.publish(state.clone());
        Ok(state)
    }

    /// Passive: attaches to a wallet that is already authorized, never prompts.
    pub async fn reconnect(&self, kind: BtcProviderKind) -> ConnectResult<BtcProviderState> {
        let wallet = self.wallet(kind)?;
        self.set_active(kind, wallet)?;
        self.refresh().await
    }

    /// Re-read the active wallet and publish what it reports.
    pub async fn refresh(&self) -> ConnectResult<BtcProviderState> {
        let Some((kind, wallet)) = self.active()? else {
            return Ok(self.state());
        };
        let state = match wallet.get_address().await? {
            Some(address) => {
                let public_key = wallet.get_public_key().await?;
                let network = wallet.network().await?;
                BtcProviderState::connected(kind, BtcAccount { address, public_key }, network)
            }
            None => BtcProviderState::locked(kind),
        };
        tracing::debug!(provider = kind.as_str(), connected = state.connected, "BTC provider refreshed");
        self.publish(state.clone());
        Ok(state)
    }

    pub async fn sign_message(&self, message: &str) -> ConnectResult<String> {
        let (_, wallet) = self.active()?.ok_or(ConnectError::NotConnected)?;
        let address = self.get_address().ok_or(ConnectError::NotConnected)?;
        wallet.sign_message(&address, message).await
    }

    pub async fn send_payment(&self, to: &str, amount_sats: u64) -> ConnectResult<String> {
        let (_, wallet) = self.active()?.ok_or(ConnectError::NotConnected)?;
        let network = self.state().network.ok_or(ConnectError::NotConnected)?;
        validate_address(to, network)?;
        wallet.send_payment(to, amount_sats).await
    }

    /// Drops the active wallet; the SDK-side disconnect is best effort.
    pub async fn disconnect(&self) {
        let active = self.active.lock().ok().and_then(|mut guard| guard.take());
        self.publish(BtcProviderState::default());
        if let Some((kind, wallet)) = active {
            if let Err(e) = wallet.disconnect().await {
                tracing::warn!(provider = kind.as_str(), error = %e, "BTC provider disconnect failed");
            }
        }
    }

    /// Subscribers only wake when the reported state actually changed.
    fn publish(&self, next: BtcProviderState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    fn wallet(&self, kind: BtcProviderKind) -> ConnectResult<Arc<dyn BtcWallet>> {
        self.wallets.get(&kind).cloned().ok_or_else(|| ConnectError::ProviderUnavailable {
            provider: kind.name().into(),
            install_url: Some(kind.install_url().into()),
        })
    }

    fn active(&self) -> ConnectResult<Option<ActiveWallet>> {
        let guard = self.active.lock().map_err(|_| ConnectError::Storage("facade lock".into()))?;
        Ok(guard.clone())
    }

    fn set_active(&self, kind: BtcProviderKind, wallet: Arc<dyn BtcWallet>) -> ConnectResult<()> {
        let mut guard = self.active.lock().map_err(|_| ConnectError::Storage("facade lock".into()))?;
        *guard = Some((kind, wallet));
        Ok(())
    }
}

/// Checks that `address` parses and belongs to `network`.
pub fn validate_address(address: &str, network: BtcNetwork) -> ConnectResult<()> {
    let parsed = bitcoin::Address::<NetworkUnchecked>::from_str(address)
        .map_err(|e| ConnectError::InvalidAddress(format!("{address}: {e}")))?;
    if !parsed.is_valid_for_network(network.to_bitcoin()) {
        return Err(ConnectError::InvalidAddress(format!(
            "{address} is not a {} address",
            network.as_str()
        )));
    }
    Ok(())
}

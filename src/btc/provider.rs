//! Wallet SDK surface and the closed set of supported BTC providers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ConnectResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BtcNetwork { #[default] Mainnet, Testnet, Signet, Regtest }

impl BtcNetwork {
    pub fn as_str(&self) -> &'static str {
        match self { BtcNetwork::Mainnet => "mainnet", BtcNetwork::Testnet => "testnet", BtcNetwork::Signet => "signet", BtcNetwork::Regtest => "regtest" }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mainnet" | "bitcoin" | "livenet" => Some(BtcNetwork::Mainnet),
            "testnet" => Some(BtcNetwork::Testnet),
            "signet" => Some(BtcNetwork::Signet),
            "regtest" => Some(BtcNetwork::Regtest),
            _ => None,
        }
    }

    pub fn to_bitcoin(&self) -> bitcoin::Network {
        match self { BtcNetwork::Mainnet => bitcoin::Network::Bitcoin, BtcNetwork::Testnet => bitcoin::Network::Testnet, BtcNetwork::Signet => bitcoin::Network::Signet, BtcNetwork::Regtest => bitcoin::Network::Regtest }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BtcProviderKind {
    Unisat,
    Xverse,
    Okx,
    Leather,
    Phantom,
    Wizz,
    MagicEden,
    Bitget,
}

impl BtcProviderKind {
    pub const ALL: &'static [BtcProviderKind] = &[
        BtcProviderKind::Unisat,
        BtcProviderKind::Xverse,
        BtcProviderKind::Okx,
        BtcProviderKind::Leather,
        BtcProviderKind::Phantom,
        BtcProviderKind::Wizz,
        BtcProviderKind::MagicEden,
        BtcProviderKind::Bitget,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BtcProviderKind::Unisat => "unisat",
            BtcProviderKind::Xverse => "xverse",
            BtcProviderKind::Okx => "okx",
            BtcProviderKind::Leather => "leather",
            BtcProviderKind::Phantom => "phantom",
            BtcProviderKind::Wizz => "wizz",
            BtcProviderKind::MagicEden => "magiceden",
            BtcProviderKind::Bitget => "bitget",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        let value = value.trim().to_ascii_lowercase();
        Self::ALL.iter().copied().find(|k| k.as_str() == value)
    }

    pub fn name(&self) -> &'static str {
        match self {
            BtcProviderKind::Unisat => "Unisat",
            BtcProviderKind::Xverse => "Xverse",
            BtcProviderKind::Okx => "OKX Wallet",
            BtcProviderKind::Leather => "Leather",
            BtcProviderKind::Phantom => "Phantom",
            BtcProviderKind::Wizz => "Wizz Wallet",
            BtcProviderKind::MagicEden => "Magic Eden",
            BtcProviderKind::Bitget => "Bitget Wallet",
        }
    }

    pub fn install_url(&self) -> &'static str {
        match self {
            BtcProviderKind::Unisat => "https://unisat.io/download",
            BtcProviderKind::Xverse => "https://www.xverse.app/download",
            BtcProviderKind::Okx => "https://www.okx.com/web3",
            BtcProviderKind::Leather => "https://leather.io/install-extension",
            BtcProviderKind::Phantom => "https://phantom.app/download",
            BtcProviderKind::Wizz => "https://wizzwallet.io",
            BtcProviderKind::MagicEden => "https://wallet.magiceden.io",
            BtcProviderKind::Bitget => "https://web3.bitget.com/wallet-download",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BtcAccount {
    pub address: String,
    /// Hex-encoded public key of `address`.
    pub public_key: String,
}

/// Normalized wallet SDK. Implementations wrap one vendor's injected object.
#[async_trait]
pub trait BtcWallet: Send + Sync {
    /// Prompts the user to authorize the page and returns the selected account.
    async fn request_accounts(&self) -> ConnectResult<BtcAccount>;
    /// Currently selected address; `None` when locked or not authorized.
    async fn get_address(&self) -> ConnectResult<Option<String>>;
    async fn get_public_key(&self) -> ConnectResult<String>;
    async fn network(&self) -> ConnectResult<BtcNetwork>;
    /// BIP-322/ECDSA message signature, base64.
    async fn sign_message(&self, address: &str, message: &str) -> ConnectResult<String>;
    /// Returns the broadcast txid.
    async fn send_payment(&self, to: &str, amount_sats: u64) -> ConnectResult<String>;
    async fn disconnect(&self) -> ConnectResult<()>;
}

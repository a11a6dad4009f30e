//! Delegated identity - a session key plus a delegation chain.
//!
//! The session key is generated locally and never leaves this struct. The
//! delegation chain, signed by the user's key (or by the sign-in canister on
//! the user's behalf), authorizes the session key to act as the user's
//! principal until the chain expires.
//!
//! `DelegatedIdentity` is not `Clone`. The connector or bridge that obtained
//! it owns it; actors only see it as an `Arc<dyn RequestSigner>`.

use async_trait::async_trait;
use bitcoin::secp256k1::{ecdsa, Message, PublicKey, Secp256k1, SecretKey};
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::actor::{RequestSigner, RequestSignature};
use crate::error::{ConnectError, ConnectResult};
use crate::principal::Principal;

/// secp256k1 key used to sign requests for the lifetime of one session.
pub struct SessionKey {
    secret: Zeroizing<[u8; 32]>,
    public: PublicKey,
}

impl SessionKey {
    pub fn generate() -> Self {
        let secp = Secp256k1::signing_only();
        let mut rng = rand::thread_rng();
        loop {
            let mut bytes = Zeroizing::new([0u8; 32]);
            rng.fill_bytes(&mut bytes[..]);
            if let Ok(sk) = SecretKey::from_slice(&bytes[..]) {
                let public = PublicKey::from_secret_key(&secp, &sk);
                return Self { secret: bytes, public };
            }
        }
    }

    pub fn from_secret_hex(secret_hex: &str) -> ConnectResult<Self> {
        let raw = Zeroizing::new(
            hex::decode(secret_hex).map_err(|e| ConnectError::Storage(format!("session key: {e}")))?,
        );
        let secret: [u8; 32] = raw
            .as_slice()
            .try_into()
            .map_err(|_| ConnectError::Storage("session key must be 32 bytes".into()))?;
        let secret = Zeroizing::new(secret);
        let sk = SecretKey::from_slice(&secret[..])
            .map_err(|e| ConnectError::Storage(format!("session key: {e}")))?;
        let public = PublicKey::from_secret_key(&Secp256k1::signing_only(), &sk);
        Ok(Self { secret, public })
    }

    /// Compressed SEC1 public key.
    pub fn public_key(&self) -> Vec<u8> {
        self.public.serialize().to_vec()
    }

    pub fn sign(&self, content: &[u8]) -> ConnectResult<Vec<u8>> {
        let sk = SecretKey::from_slice(&self.secret[..])
            .map_err(|e| ConnectError::Storage(format!("session key: {e}")))?;
        let digest: [u8; 32] = Sha256::digest(content).into();
        let sig = Secp256k1::signing_only().sign_ecdsa(&Message::from_digest(digest), &sk);
        Ok(sig.serialize_compact().to_vec())
    }

    fn secret_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(&self.secret[..]))
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKey").field("public", &hex::encode(self.public_key())).finish()
    }
}

/// Verify a compact signature produced by [`SessionKey::sign`].
pub fn verify_signature(public_key: &[u8], content: &[u8], signature: &[u8]) -> bool {
    let (Ok(pk), Ok(sig)) = (PublicKey::from_slice(public_key), ecdsa::Signature::from_compact(signature)) else {
        return false;
    };
    let digest: [u8; 32] = Sha256::digest(content).into();
    Secp256k1::verification_only()
        .verify_ecdsa(&Message::from_digest(digest), &sig, &pk)
        .is_ok()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegation {
    /// Session public key being authorized.
    #[serde(with = "hex_bytes")]
    pub pubkey: Vec<u8>,
    pub expiration: DateTime<Utc>,
    /// Canisters the delegation is restricted to, if any.
    pub targets: Option<Vec<Principal>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedDelegation {
    pub delegation: Delegation,
    #[serde(with = "hex_bytes")]
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationChain {
    /// Public key whose self-authenticating principal the chain speaks for.
    #[serde(with = "hex_bytes")]
    pub user_public_key: Vec<u8>,
    pub delegations: Vec<SignedDelegation>,
}

impl DelegationChain {
    /// Earliest expiration along the chain.
    pub fn expiration(&self) -> Option<DateTime<Utc>> {
        self.delegations.iter().map(|d| d.delegation.expiration).min()
    }
}

#[derive(Debug)]
pub struct DelegatedIdentity {
    session_key: SessionKey,
    chain: DelegationChain,
    principal: Principal,
}

impl DelegatedIdentity {
    pub fn new(session_key: SessionKey, chain: DelegationChain) -> ConnectResult<Self> {
        let last = chain
            .delegations
            .last()
            .ok_or_else(|| ConnectError::Exchange("empty delegation chain".into()))?;
        if last.delegation.pubkey != session_key.public_key() {
            return Err(ConnectError::Exchange("delegation does not target the session key".into()));
        }
        let principal = Principal::self_authenticating(&chain.user_public_key);
        Ok(Self { session_key, chain, principal })
    }

    pub fn principal(&self) -> &Principal { &self.principal }

    pub fn chain(&self) -> &DelegationChain { &self.chain }

    pub fn expiration(&self) -> Option<DateTime<Utc>> { self.chain.expiration() }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiration().map(|exp| exp <= now).unwrap_or(true)
    }

    pub fn to_json(&self) -> ConnectResult<String> {
        let stored = StoredIdentity {
            session_key: self.session_key.secret_hex().to_string(),
            chain: self.chain.clone(),
        };
        Ok(serde_json::to_string(&stored)?)
    }

    pub fn from_json(raw: &str) -> ConnectResult<Self> {
        let stored: StoredIdentity = serde_json::from_str(raw)?;
        let session_key = SessionKey::from_secret_hex(&stored.session_key)?;
        Self::new(session_key, stored.chain)
    }
}

#[async_trait]
impl RequestSigner for DelegatedIdentity {
    fn principal(&self) -> Principal {
        self.principal.clone()
    }

    async fn sign(&self, content: &[u8]) -> ConnectResult<RequestSignature> {
        if self.is_expired_at(Utc::now()) {
            return Err(ConnectError::SessionExpired);
        }
        Ok(RequestSignature {
            public_key: self.session_key.public_key(),
            signature: self.session_key.sign(content)?,
            delegations: self.chain.delegations.clone(),
        })
    }
}

#[derive(Serialize, Deserialize)]
struct StoredIdentity {
    session_key: String,
    chain: DelegationChain,
}

pub(crate) mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

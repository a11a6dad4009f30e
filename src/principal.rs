//! Principal - canonical identifier of an authenticated caller
//!
//! Self-authenticating principals are derived from the caller's public key:
//!
//! | Kind | Bytes | Text |
//! |------|-------|------|
//! | Self-authenticating | `SHA-224(pubkey) ‖ 0x02` | grouped lowercase hex |
//! | Anonymous | `0x04` | `2vxsx-fae` |
//! | Management placeholder | empty | `aaaaa-aa` |
//!
//! # Example
//!
//! ```ignore
//! let p = Principal::self_authenticating(&pubkey);
//! assert_eq!(Principal::from_text(&p.to_text())?, p);
//! ```

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha224};
use std::fmt;

use crate::error::{ConnectError, ConnectResult};

const SELF_AUTHENTICATING_TAG: u8 = 0x02;
const ANONYMOUS_TAG: u8 = 0x04;
const ANONYMOUS_TEXT: &str = "2vxsx-fae";
const PLACEHOLDER_TEXT: &str = "aaaaa-aa";
const MAX_LEN: usize = 29;
const GROUP: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Principal(Vec<u8>);

impl Principal {
    /// Derive the principal owning `public_key`.
    pub fn self_authenticating(public_key: &[u8]) -> Self {
        let mut bytes = Sha224::digest(public_key).to_vec();
        bytes.push(SELF_AUTHENTICATING_TAG);
        Self(bytes)
    }

    pub fn anonymous() -> Self {
        Self(vec![ANONYMOUS_TAG])
    }

    /// The empty principal some signers hand out before an account is picked.
    pub fn placeholder() -> Self {
        Self(Vec::new())
    }

    pub fn from_slice(bytes: &[u8]) -> ConnectResult<Self> {
        if bytes.len() > MAX_LEN {
            return Err(ConnectError::InvalidPrincipal(format!(
                "principal must be at most {MAX_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self(bytes.to_vec()))
    }

    pub fn from_text(text: &str) -> ConnectResult<Self> {
        match text {
            ANONYMOUS_TEXT => return Ok(Self::anonymous()),
            PLACEHOLDER_TEXT => return Ok(Self::placeholder()),
            _ => {}
        }
        let compact: String = text.chars().filter(|c| *c != '-').collect();
        let bytes = hex::decode(&compact)
            .map_err(|e| ConnectError::InvalidPrincipal(format!("{text}: {e}")))?;
        let principal = Self::from_slice(&bytes)?;
        if principal.is_placeholder() || principal.to_text() != text {
            return Err(ConnectError::InvalidPrincipal(format!("{text}: not canonical")));
        }
        Ok(principal)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn is_anonymous(&self) -> bool {
        self.0 == [ANONYMOUS_TAG]
    }

    pub fn is_placeholder(&self) -> bool {
        self.0.is_empty()
    }

    /// A principal a session may be established for.
    pub fn is_authenticated(&self) -> bool {
        !self.is_anonymous() && !self.is_placeholder()
    }

    /// Text form: "6f0c3-8a1b2-…"
    pub fn to_text(&self) -> String {
        if self.is_anonymous() {
            return ANONYMOUS_TEXT.into();
        }
        if self.is_placeholder() {
            return PLACEHOLDER_TEXT.into();
        }
        let hex = hex::encode(&self.0);
        hex.as_bytes()
            .chunks(GROUP)
            .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
            .collect::<Vec<_>>()
            .join("-")
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl std::str::FromStr for Principal {
    type Err = ConnectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_text(s)
    }
}

impl Serialize for Principal {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_text())
    }
}

impl<'de> Deserialize<'de> for Principal {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::from_text(&text).map_err(serde::de::Error::custom)
    }
}

//! Chains the client keeps a session on.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    /// Smart-contract execution layer.
    Ledger,
    /// Bitcoin-anchored settlement layer.
    Bitcoin,
}

impl Chain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Ledger => "ledger",
            Chain::Bitcoin => "bitcoin",
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//! Shared vocabulary: chains and persisted keys.

pub mod chain;
pub mod keys;

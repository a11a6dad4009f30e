//! Race an operation against a fixed deadline.
//!
//! Every probe that depends on an external process (unlock checks, signer
//! channel establishment and teardown) goes through [`with_timeout`] so that
//! it resolves to a negative result instead of hanging the caller.

use std::future::Future;
use std::time::Duration;

use crate::error::ConnectError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimedOut {
    pub after: Duration,
}

impl TimedOut {
    pub fn into_error(self, operation: &'static str) -> ConnectError {
        ConnectError::Timeout { operation, after: self.after }
    }
}

pub async fn with_timeout<F>(operation: F, duration: Duration) -> Result<F::Output, TimedOut>
where
    F: Future,
{
    tokio::time::timeout(duration, operation)
        .await
        .map_err(|_| TimedOut { after: duration })
}

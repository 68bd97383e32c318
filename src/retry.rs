//! Retry with bounded exponential backoff.
//!
//! Collaborator calls (chat transport, listing platform, site API) retry
//! only on a transient allow-list of HTTP statuses; errors without a
//! status (connection resets, timeouts) are treated as transient.

use std::future::Future;
use std::time::Duration;

use crate::error::{GeneratorError, ListingError, SiteError, TransportError};

/// HTTP statuses worth retrying.
pub const TRANSIENT_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Bounded exponential backoff policy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Policy for AI generation calls: fewer attempts, same backoff.
    pub fn generation() -> Self {
        Self {
            max_attempts: 2,
            ..Self::default()
        }
    }

    /// Delay before the given retry (attempt is 1-based).
    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        exp.min(self.max_delay)
    }
}

/// Errors that may expose an HTTP-like status for retry decisions.
pub trait Transient {
    /// The upstream status, when one was received.
    fn transient_status(&self) -> Option<u16>;
}

impl Transient for TransportError {
    fn transient_status(&self) -> Option<u16> {
        self.status()
    }
}

impl Transient for ListingError {
    fn transient_status(&self) -> Option<u16> {
        self.status()
    }
}

impl Transient for SiteError {
    fn transient_status(&self) -> Option<u16> {
        self.status()
    }
}

impl Transient for GeneratorError {
    fn transient_status(&self) -> Option<u16> {
        None
    }
}

fn is_transient(status: Option<u16>) -> bool {
    match status {
        Some(code) => TRANSIENT_STATUSES.contains(&code),
        // No status means the request never completed.
        None => true,
    }
}

/// Run `op` with retries according to `policy`.
///
/// Non-transient failures (4xx other than 429) return immediately.
pub async fn with_backoff<T, E, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, E>
where
    E: Transient + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= policy.max_attempts || !is_transient(err.transient_status()) {
                    return Err(err);
                }
                let delay = policy.delay_for(attempt);
                tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, "Retrying: {err}");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

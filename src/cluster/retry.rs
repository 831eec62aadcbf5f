//! Retry policies
//!
//! The driver's own retry policy is set to fall through, so every retry
//! decision is made here, with backoff between attempts.

use std::time::Duration;

use rand::Rng;

use super::statement::Statement;
use crate::config::RetryConfig;
use crate::error::WidecolError;

/// Outcome of a [`RetryPolicy`] for one failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-run the statement after sleeping this long
    Retry(Duration),
    /// Give up and return the error to the caller
    DontRetry,
}

/// Decides whether a failed statement is re-sent
pub trait RetryPolicy: Send + Sync {
    /// `retries` is the number of retries already made for this statement
    fn decide(&self, statement: &Statement, error: &WidecolError, retries: u32) -> RetryDecision;
}

/// Exponential backoff with jitter, for idempotent statements only
///
/// The n-th retry sleeps a random duration in `[b/2, b]` where
/// `b = min(min_backoff * 2^n, max_backoff)`, never below `min_backoff`.
///
/// # Retry storms
///
/// During a leader election or a node restart every client sees timeouts
/// at the same moment. Retrying them multiplies the load on the surviving
/// replicas exactly when they have the least headroom, which can turn a
/// short blip into a cluster-wide outage. Keep `num_retries` small,
/// especially with short query timeouts.
#[derive(Debug, Clone)]
pub struct ExponentialBackoffRetry {
    /// Attempt budget and backoff bounds
    config: RetryConfig,
}

impl ExponentialBackoffRetry {
    /// Create a policy with the given budget and bounds
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Upper bound of the sleep before retry number `retries`
    pub fn ceiling(&self, retries: u32) -> Duration {
        let factor = 1u32.checked_shl(retries.min(31)).unwrap_or(u32::MAX);
        self.config
            .min_backoff
            .checked_mul(factor)
            .unwrap_or(self.config.max_backoff)
            .min(self.config.max_backoff)
    }

    /// Jittered sleep before retry number `retries`
    pub fn backoff(&self, retries: u32) -> Duration {
        let ceiling = self.ceiling(retries).as_millis() as u64;
        let floor = self.config.min_backoff.as_millis() as u64;
        let jittered = if ceiling == 0 {
            0
        } else {
            rand::thread_rng().gen_range(ceiling / 2..=ceiling)
        };
        Duration::from_millis(jittered.max(floor))
    }
}

impl RetryPolicy for ExponentialBackoffRetry {
    fn decide(&self, statement: &Statement, error: &WidecolError, retries: u32) -> RetryDecision {
        if !statement.idempotent || !error.is_retriable() || retries >= self.config.num_retries {
            return RetryDecision::DontRetry;
        }
        RetryDecision::Retry(self.backoff(retries))
    }
}

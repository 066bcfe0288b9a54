//! Retry policy for failed tasks.
//!
//! Answers two questions for the dispatcher: has this delivery used up its
//! retry budget, and how long should the next requeue wait.

use std::time::Duration;

use lapin::types::FieldTable;
use serde::{Deserialize, Serialize};

use crate::envelope::RetryEnvelope;

pub const MAX_RETRIES_ENV: &str = "QUEUE_MAX_RETRIES";
pub const BASE_DELAY_ENV: &str = "QUEUE_RETRY_BASE_DELAY_SECS";
pub const MAX_DELAY_ENV: &str = "QUEUE_RETRY_MAX_DELAY_SECS";

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Number of requeues allowed before a task is dead-lettered.
    ///
    /// Default: 3
    #[serde(default = "defaults::max_retries")]
    pub max_retries: u32,

    /// Delay before the first requeue (in seconds).
    ///
    /// The delay for retry `r` is `base * 2^r`, capped at `max_delay_secs`.
    ///
    /// Default: 1 second
    #[serde(default = "defaults::base_delay_secs")]
    pub base_delay_secs: u64,

    /// Upper bound on any single backoff (in seconds).
    ///
    /// Default: 300 seconds (5 minutes)
    #[serde(default = "defaults::max_delay_secs")]
    pub max_delay_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: defaults::max_retries(),
            base_delay_secs: defaults::base_delay_secs(),
            max_delay_secs: defaults::max_delay_secs(),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn max_retries(&self) -> u32 {
        self.max_retries
    }

    #[must_use]
    pub const fn base_delay_secs(&self) -> u64 {
        self.base_delay_secs
    }

    #[must_use]
    pub const fn max_delay_secs(&self) -> u64 {
        self.max_delay_secs
    }

    /// Backoff before requeueing a task that has already been retried
    /// `retry_count` times: `min(base * 2^retry_count, max)`.
    ///
    /// Saturates instead of overflowing, so very large counts simply return
    /// the cap.
    #[must_use]
    pub fn compute_delay(&self, retry_count: u32) -> Duration {
        let factor = 1_u64.checked_shl(retry_count).unwrap_or(u64::MAX);
        let secs = self
            .base_delay_secs
            .saturating_mul(factor)
            .min(self.max_delay_secs);
        Duration::from_secs(secs)
    }

    /// Reads the retry count from delivery headers. Absent or malformed
    /// counts are treated as zero.
    #[must_use]
    pub fn extract_retry_count(headers: Option<&FieldTable>) -> u32 {
        RetryEnvelope::from_headers(headers).retry_count
    }

    /// Returns `true` if a delivery carrying `retry_count` must not be
    /// processed again.
    #[must_use]
    pub const fn is_exhausted(&self, retry_count: u32) -> bool {
        retry_count >= self.max_retries
    }

    /// Overrides fields from the environment. Unset or unparsable values
    /// leave the current setting in place.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(MAX_RETRIES_ENV).and_then(|v| v.trim().parse().ok()) {
            self.max_retries = value;
        }
        if let Some(value) = lookup(BASE_DELAY_ENV).and_then(|v| v.trim().parse().ok()) {
            self.base_delay_secs = value;
        }
        if let Some(value) = lookup(MAX_DELAY_ENV).and_then(|v| v.trim().parse().ok()) {
            self.max_delay_secs = value;
        }
    }
}

mod defaults {
    pub const fn max_retries() -> u32 {
        3
    }

    pub const fn base_delay_secs() -> u64 {
        1
    }

    pub const fn max_delay_secs() -> u64 {
        300 // 5 minutes
    }
}

//! Health check logic

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Tracks the status of the components readiness depends on.
#[derive(Debug)]
pub struct HealthChecker {
    /// Whether a broker link is installed and open
    broker_ready: AtomicBool,

    /// Whether the consumer holds an active subscription
    consumer_ready: AtomicBool,

    /// Retries waiting to be republished
    pending_retries: AtomicU64,

    max_pending_retries: u64,
}

impl HealthChecker {
    #[must_use]
    pub const fn new(max_pending_retries: u64) -> Self {
        Self {
            broker_ready: AtomicBool::new(false),
            consumer_ready: AtomicBool::new(false),
            pending_retries: AtomicU64::new(0),
            max_pending_retries,
        }
    }

    pub fn set_broker_ready(&self, ready: bool) {
        if self.broker_ready.swap(ready, Ordering::Relaxed) != ready {
            tracing::debug!(ready, "Broker readiness updated");
        }
    }

    pub fn set_consumer_ready(&self, ready: bool) {
        if self.consumer_ready.swap(ready, Ordering::Relaxed) != ready {
            tracing::debug!(ready, "Consumer readiness updated");
        }
    }

    pub fn set_pending_retries(&self, pending: u64) {
        self.pending_retries.store(pending, Ordering::Relaxed);
    }

    /// If the process can answer at all it is alive.
    #[must_use]
    pub const fn is_alive(&self) -> bool {
        true
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        let status = self.get_status();
        if !status.ready {
            tracing::debug!(
                broker_ready = status.broker_ready,
                consumer_ready = status.consumer_ready,
                pending_retries = status.pending_retries,
                max_pending_retries = status.max_pending_retries,
                "Readiness check failed"
            );
        }
        status.ready
    }

    #[must_use]
    pub fn get_status(&self) -> HealthStatus {
        let broker_ready = self.broker_ready.load(Ordering::Relaxed);
        let consumer_ready = self.consumer_ready.load(Ordering::Relaxed);
        let pending_retries = self.pending_retries.load(Ordering::Relaxed);

        HealthStatus {
            alive: self.is_alive(),
            ready: broker_ready && consumer_ready && pending_retries < self.max_pending_retries,
            broker_ready,
            consumer_ready,
            pending_retries,
            max_pending_retries: self.max_pending_retries,
        }
    }
}

/// Detailed health status, returned as the body of the readiness probe.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct HealthStatus {
    pub alive: bool,
    pub ready: bool,
    pub broker_ready: bool,
    pub consumer_ready: bool,
    pub pending_retries: u64,
    pub max_pending_retries: u64,
}

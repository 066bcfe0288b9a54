//! Delayed republishing of transiently failed tasks.
//!
//! The delay lives in this process only. On graceful shutdown every pending
//! retry is published straight away rather than dropped; a crash still loses
//! whatever is waiting.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use postie_common::{internal, outgoing};
use tokio::sync::{Notify, watch};

use crate::{envelope::RetryEnvelope, error::BrokerError};

/// Publishes a task body back into the main exchange.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish persistently under the main routing key, with `envelope`
    /// written into the headers.
    async fn publish(&self, body: &[u8], envelope: &RetryEnvelope) -> Result<(), BrokerError>;
}

#[derive(Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

/// Decrements the in-flight count when a retry task ends, however it ends.
struct InFlightGuard(Arc<InFlight>);

impl InFlightGuard {
    fn new(in_flight: Arc<InFlight>) -> Self {
        in_flight.count.fetch_add(1, Ordering::AcqRel);
        Self(in_flight)
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

pub struct RetryScheduler {
    publisher: Arc<dyn Publisher>,
    in_flight: Arc<InFlight>,
    flush: watch::Sender<bool>,
}

impl RetryScheduler {
    pub fn new(publisher: Arc<dyn Publisher>) -> Self {
        let (flush, _) = watch::channel(false);
        Self {
            publisher,
            in_flight: Arc::default(),
            flush,
        }
    }

    /// Retries waiting for their delay or currently publishing.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.in_flight.count.load(Ordering::Acquire)
    }

    /// Republish `body` with `envelope` once `delay` has passed.
    ///
    /// Returns immediately; the wait happens on its own task. A publish
    /// failure is logged and the task is dropped, since the original
    /// delivery has already been rejected.
    pub fn schedule(&self, body: Vec<u8>, envelope: RetryEnvelope, delay: Duration) {
        let guard = InFlightGuard::new(Arc::clone(&self.in_flight));
        let publisher = Arc::clone(&self.publisher);
        let mut flush = self.flush.subscribe();

        tokio::spawn(async move {
            let _guard = guard;

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                true = async { flush.wait_for(|flushing| *flushing).await.is_ok() } => {
                    internal!(
                        level = DEBUG,
                        retry_count = envelope.retry_count,
                        "Flushing retry before its delay elapsed"
                    );
                }
            }

            match publisher.publish(&body, &envelope).await {
                Ok(()) => outgoing!(
                    level = INFO,
                    retry_count = envelope.retry_count,
                    "Republished task for retry"
                ),
                Err(e) => outgoing!(
                    level = ERROR,
                    retry_count = envelope.retry_count,
                    error = %e,
                    "Failed to republish task, dropping it"
                ),
            }
        });
    }

    /// Cut every pending delay short and wait for the republishes to finish.
    ///
    /// Retries scheduled after this call are published without delay.
    /// Returns `false` if some were still outstanding when `timeout` expired.
    pub async fn flush_and_wait(&self, timeout: Duration) -> bool {
        self.flush.send_replace(true);

        let drained = async {
            loop {
                let idle = self.in_flight.idle.notified();
                if self.pending() == 0 {
                    return;
                }
                idle.await;
            }
        };

        tokio::time::timeout(timeout, drained).await.is_ok()
    }
}

//! Classifies each delivery and settles it.
//!
//! ```text
//! Received ─┬─> Exhausted   (retry budget used up: reject)
//!           ├─> Malformed   (undecodable body: reject)
//!           └─> Processing ─┬─> Acked     (handler succeeded: ack)
//!                           ├─> Retrying  (handler failed: reject + schedule)
//!                           └─> Unsettled (handler failed, reject failed)
//! ```
//!
//! Exactly one of these is reached per delivery.

use std::{sync::Arc, time::Duration};

use postie_common::{EmailTask, incoming, internal};

use crate::{
    delivery::Delivery,
    error::{PermanentError, ProcessingError, TemporaryError},
    handler::TaskHandler,
    policy::RetryPolicy,
    scheduler::RetryScheduler,
};

/// Terminal outcome of one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Processed successfully and acknowledged.
    Acked,
    /// Body could not be decoded; dead-lettered.
    Malformed,
    /// Arrived with its retry budget used up; dead-lettered unprocessed.
    Exhausted,
    /// Failed transiently; rejected and scheduled for republish.
    Retrying {
        /// Count carried by the republished copy.
        retry_count: u32,
        delay: Duration,
    },
    /// Failed transiently, but the reject never reached the broker. Nothing
    /// was scheduled; the broker redelivers the original with its current
    /// count.
    Unsettled,
}

pub struct Dispatcher {
    policy: RetryPolicy,
    handler: Arc<dyn TaskHandler>,
    scheduler: Arc<RetryScheduler>,
    task_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        policy: RetryPolicy,
        handler: Arc<dyn TaskHandler>,
        scheduler: Arc<RetryScheduler>,
        task_timeout: Duration,
    ) -> Self {
        Self {
            policy,
            handler,
            scheduler,
            task_timeout,
        }
    }

    /// Process one delivery through to its terminal disposition.
    ///
    /// Settlement failures are logged rather than returned: the broker
    /// redelivers anything it did not see settled, so the disposition still
    /// describes what this process decided.
    #[tracing::instrument(skip_all, fields(delivery_tag = delivery.tag, retry_count = delivery.envelope.retry_count))]
    pub async fn dispatch(&self, delivery: Delivery) -> Disposition {
        let retry_count = delivery.envelope.retry_count;

        if self.policy.is_exhausted(retry_count) {
            let error = ProcessingError::from(PermanentError::RetriesExhausted {
                attempts: retry_count,
            });
            incoming!(level = WARN, error = %error, "Dead-lettering task");
            Self::reject(&delivery).await;
            return Disposition::Exhausted;
        }

        let task = match EmailTask::decode(&delivery.body) {
            Ok(task) => task,
            Err(e) => {
                let error = ProcessingError::from(PermanentError::from(e));
                incoming!(level = WARN, error = %error, "Dead-lettering task");
                Self::reject(&delivery).await;
                return Disposition::Malformed;
            }
        };

        incoming!(level = DEBUG, to = %task.to, kind = %task.kind, "Processing task");

        match self.process(&task).await {
            Ok(()) => {
                if let Err(e) = delivery.ack().await {
                    internal!(level = ERROR, error = %e, "Failed to acknowledge task");
                }
                incoming!(level = INFO, to = %task.to, "Task processed");
                Disposition::Acked
            }
            Err(error) => self.retry(delivery, &error).await,
        }
    }

    async fn process(&self, task: &EmailTask) -> Result<(), TemporaryError> {
        tokio::time::timeout(self.task_timeout, self.handler.handle(task))
            .await
            .unwrap_or(Err(TemporaryError::Timeout(self.task_timeout)))
    }

    async fn retry(&self, delivery: Delivery, error: &TemporaryError) -> Disposition {
        let delay = self.policy.compute_delay(delivery.envelope.retry_count);
        let envelope = delivery
            .envelope
            .next_attempt(error.to_string(), chrono::Utc::now().timestamp());
        let retry_count = envelope.retry_count;

        incoming!(
            level = WARN,
            error = %error,
            delay_secs = delay.as_secs(),
            "Task failed, scheduling retry"
        );

        if !Self::reject(&delivery).await {
            return Disposition::Unsettled;
        }

        self.scheduler.schedule(delivery.body, envelope, delay);
        Disposition::Retrying { retry_count, delay }
    }

    /// Returns `false` if the broker was not told; it will redeliver the
    /// original in that case, so no copy may be scheduled.
    async fn reject(delivery: &Delivery) -> bool {
        match delivery.reject().await {
            Ok(()) => true,
            Err(e) => {
                internal!(level = ERROR, error = %e, "Failed to reject task");
                false
            }
        }
    }
}

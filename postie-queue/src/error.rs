//! Typed error handling for the queue consumer.
//!
//! Two families of failure are kept apart:
//! - [`BrokerError`]: the transport to the broker. Recovered by the connection
//!   manager and never surfaced as a task failure.
//! - [`ProcessingError`]: what happened to one task. Permanent failures are
//!   dead-lettered, temporary ones are retried with backoff.

use std::time::Duration;

use postie_common::TaskDecodeError;
use thiserror::Error;

/// Failures talking to the broker.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The TCP/AMQP connection could not be established.
    #[error("Failed to connect to broker at {address}: {reason}")]
    Connect { address: String, reason: String },

    /// The connection is up but a channel could not be opened or configured.
    #[error("Channel error: {0}")]
    Channel(String),

    /// One declaration of the topology failed; setup is aborted.
    #[error("Topology setup failed at {step}: {reason}")]
    Topology { step: String, reason: String },

    /// No live link is installed (startup failed, recovering, or closed).
    #[error("Broker connection is not available")]
    NotConnected,

    /// Publishing to the main exchange failed or was nacked.
    #[error("Publish failed: {0}")]
    Publish(String),

    /// Acknowledging or rejecting a delivery failed.
    #[error("Failed to settle delivery {tag}: {reason}")]
    Settle { tag: u64, reason: String },

    /// Registering the consumer on the main queue failed.
    #[error("Failed to subscribe to queue {queue}: {reason}")]
    Subscribe { queue: String, reason: String },

    /// The delivery stream yielded an error.
    #[error("Delivery stream error: {0}")]
    Stream(String),
}

/// Top-level outcome of a failed task.
#[derive(Debug, Error)]
pub enum ProcessingError {
    /// The task must not be retried.
    #[error("Permanent failure: {0}")]
    Permanent(#[from] PermanentError),

    /// The task may succeed on a later attempt.
    #[error("Temporary failure: {0}")]
    Temporary(#[from] TemporaryError),
}

/// Failures that dead-letter a task immediately.
#[derive(Debug, Error)]
pub enum PermanentError {
    /// The body is not a valid task. Malformed payloads cannot self-heal.
    #[error(transparent)]
    Malformed(#[from] TaskDecodeError),

    /// The retry budget was used up before this delivery arrived.
    #[error("Retry budget exhausted after {attempts} retries")]
    RetriesExhausted { attempts: u32 },
}

/// Failures that are retried with exponential backoff.
#[derive(Debug, Error)]
pub enum TemporaryError {
    /// The task record could not be created or updated.
    #[error("Task store error: {0}")]
    Store(String),

    /// The mail sender reported a failure.
    #[error("Send failed: {0}")]
    Send(String),

    /// The handler did not finish within the configured deadline.
    #[error("Task timed out after {}s", .0.as_secs())]
    Timeout(Duration),
}

impl ProcessingError {
    /// Returns `true` if this error should be retried.
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        matches!(self, Self::Temporary(_))
    }

    /// Returns `true` if this error dead-letters the task.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }
}

#[cfg(test)]
mod tests {
    use postie_common::EmailTask;

    use super::*;

    #[test]
    fn test_malformed_is_permanent() {
        let decode = EmailTask::decode(b"{").unwrap_err();
        let error = ProcessingError::from(PermanentError::from(decode));
        assert!(error.is_permanent());
        assert!(!error.is_temporary());
        assert!(error.to_string().starts_with("Permanent failure: Malformed task payload"));
    }

    #[test]
    fn test_send_failure_is_temporary() {
        let error = ProcessingError::from(TemporaryError::Send("421 try later".to_string()));
        assert!(error.is_temporary());
        assert_eq!(
            error.to_string(),
            "Temporary failure: Send failed: 421 try later"
        );
    }

    #[test]
    fn test_timeout_display() {
        let error = TemporaryError::Timeout(Duration::from_secs(60));
        assert_eq!(error.to_string(), "Task timed out after 60s");
    }

    #[test]
    fn test_topology_error_names_step() {
        let error = BrokerError::Topology {
            step: "queue email_queue".to_string(),
            reason: "PRECONDITION_FAILED".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Topology setup failed at queue email_queue: PRECONDITION_FAILED"
        );
    }
}

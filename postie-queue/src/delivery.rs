use std::{fmt, sync::Arc};

use async_trait::async_trait;
use lapin::{
    acker::Acker,
    options::{BasicAckOptions, BasicRejectOptions},
};

use crate::{envelope::RetryEnvelope, error::BrokerError};

/// Settles one delivery with the broker.
///
/// Every delivery is settled exactly once, either acknowledged or rejected.
/// Rejection never requeues; the broker dead-letters rejected deliveries
/// according to the queue arguments.
#[async_trait]
pub trait Settle: Send + Sync {
    /// Single-message acknowledgement.
    async fn ack(&self, tag: u64) -> Result<(), BrokerError>;

    /// Reject without requeue.
    async fn reject(&self, tag: u64) -> Result<(), BrokerError>;
}

/// One broker-delivered copy of a task.
#[derive(Clone)]
pub struct Delivery {
    pub tag: u64,
    pub body: Vec<u8>,
    pub envelope: RetryEnvelope,
    settle: Arc<dyn Settle>,
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("tag", &self.tag)
            .field("body_len", &self.body.len())
            .field("envelope", &self.envelope)
            .finish_non_exhaustive()
    }
}

impl Delivery {
    pub fn new(
        tag: u64,
        body: Vec<u8>,
        envelope: RetryEnvelope,
        settle: Arc<dyn Settle>,
    ) -> Self {
        Self {
            tag,
            body,
            envelope,
            settle,
        }
    }

    /// # Errors
    ///
    /// If the broker could not be told about the acknowledgement.
    pub async fn ack(&self) -> Result<(), BrokerError> {
        self.settle.ack(self.tag).await
    }

    /// # Errors
    ///
    /// If the broker could not be told about the rejection.
    pub async fn reject(&self) -> Result<(), BrokerError> {
        self.settle.reject(self.tag).await
    }
}

/// Settles through the channel the delivery arrived on.
struct AmqpSettle(Acker);

#[async_trait]
impl Settle for AmqpSettle {
    async fn ack(&self, tag: u64) -> Result<(), BrokerError> {
        self.0
            .ack(BasicAckOptions { multiple: false })
            .await
            .map_err(|e| BrokerError::Settle {
                tag,
                reason: e.to_string(),
            })
    }

    async fn reject(&self, tag: u64) -> Result<(), BrokerError> {
        self.0
            .reject(BasicRejectOptions { requeue: false })
            .await
            .map_err(|e| BrokerError::Settle {
                tag,
                reason: e.to_string(),
            })
    }
}

impl From<lapin::message::Delivery> for Delivery {
    fn from(delivery: lapin::message::Delivery) -> Self {
        let envelope = RetryEnvelope::from_headers(delivery.properties.headers().as_ref());
        Self::new(
            delivery.delivery_tag,
            delivery.data,
            envelope,
            Arc::new(AmqpSettle(delivery.acker)),
        )
    }
}

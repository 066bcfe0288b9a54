//! Reliable consumer for the email task queue
//!
//! This crate provides functionality to:
//! - Declare the durable exchange/queue topology, including the dead-letter pair
//! - Own the broker connection and recover it transparently after failures
//! - Consume tasks with bounded prefetch and a bounded worker pool
//! - Classify each delivery and ack, dead-letter or schedule a retry
//! - Republish transiently failed tasks after an exponential backoff

mod config;
pub mod connection;
mod consumer;
mod delivery;
mod dispatcher;
mod envelope;
mod error;
mod handler;
pub mod policy;
mod pool;
mod scheduler;
mod topology;

pub use config::{BrokerConfig, ConsumerConfig};
pub use connection::{
    AmqpDialer, AmqpLink, ConnectionManager, Dialer, FailureSignal, Link,
};
pub use consumer::{
    ConsumerLoop, Deliveries, StreamEnd, Subscribe, Subscriber, drive, stopped,
};
pub use delivery::{Delivery, Settle};
pub use dispatcher::{Dispatcher, Disposition};
pub use envelope::{LAST_ERROR_HEADER, LAST_RETRY_HEADER, RETRY_COUNT_HEADER, RetryEnvelope};
pub use error::{BrokerError, PermanentError, ProcessingError, TemporaryError};
pub use handler::TaskHandler;
pub use policy::RetryPolicy;
pub use pool::WorkerPool;
pub use scheduler::{Publisher, RetryScheduler};
pub use topology::{Declaration, Topology};

//! Broker objects required for durable, retry-capable delivery.

use lapin::{
    Channel, ExchangeKind,
    options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions},
    types::{AMQPValue, FieldTable, LongString},
};
use serde::{Deserialize, Serialize};

use crate::error::BrokerError;

/// 24 hours, in milliseconds.
pub const MESSAGE_TTL_MS: i32 = 86_400_000;
pub const MAX_PRIORITY: i32 = 10;
pub const OVERFLOW_POLICY: &str = "drop-head";

/// Names of the exchanges, queues and routing keys in use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    #[serde(default = "defaults::exchange")]
    pub exchange: String,

    #[serde(default = "defaults::queue")]
    pub queue: String,

    #[serde(default = "defaults::routing_key")]
    pub routing_key: String,

    #[serde(default = "defaults::dead_letter_exchange")]
    pub dead_letter_exchange: String,

    #[serde(default = "defaults::dead_letter_queue")]
    pub dead_letter_queue: String,

    #[serde(default = "defaults::dead_letter_routing_key")]
    pub dead_letter_routing_key: String,
}

impl Default for Topology {
    fn default() -> Self {
        Self {
            exchange: defaults::exchange(),
            queue: defaults::queue(),
            routing_key: defaults::routing_key(),
            dead_letter_exchange: defaults::dead_letter_exchange(),
            dead_letter_queue: defaults::dead_letter_queue(),
            dead_letter_routing_key: defaults::dead_letter_routing_key(),
        }
    }
}

/// One step of topology setup.
#[derive(Debug, Clone, PartialEq)]
pub enum Declaration {
    /// A durable direct exchange.
    Exchange { name: String },
    /// A durable, non-exclusive, non-auto-delete queue.
    Queue { name: String, arguments: FieldTable },
    Bind {
        queue: String,
        exchange: String,
        routing_key: String,
    },
}

impl Declaration {
    /// Human-readable name of the step, used when it fails.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Exchange { name } => format!("exchange {name}"),
            Self::Queue { name, .. } => format!("queue {name}"),
            Self::Bind {
                queue,
                exchange,
                routing_key,
            } => format!("bind {queue} to {exchange} ({routing_key})"),
        }
    }

    async fn apply(&self, channel: &Channel) -> Result<(), lapin::Error> {
        match self {
            Self::Exchange { name } => {
                channel
                    .exchange_declare(
                        name,
                        ExchangeKind::Direct,
                        ExchangeDeclareOptions {
                            durable: true,
                            ..ExchangeDeclareOptions::default()
                        },
                        FieldTable::default(),
                    )
                    .await
            }
            Self::Queue { name, arguments } => channel
                .queue_declare(
                    name,
                    QueueDeclareOptions {
                        durable: true,
                        exclusive: false,
                        auto_delete: false,
                        ..QueueDeclareOptions::default()
                    },
                    arguments.clone(),
                )
                .await
                .map(|_| ()),
            Self::Bind {
                queue,
                exchange,
                routing_key,
            } => {
                channel
                    .queue_bind(
                        queue,
                        exchange,
                        routing_key,
                        QueueBindOptions::default(),
                        FieldTable::default(),
                    )
                    .await
            }
        }
    }
}

impl Topology {
    /// Policy arguments of the main queue.
    ///
    /// These must stay identical across restarts: the broker refuses to
    /// redeclare an existing queue with different arguments.
    #[must_use]
    pub fn queue_arguments(&self) -> FieldTable {
        let mut arguments = FieldTable::default();
        arguments.insert("x-message-ttl".into(), AMQPValue::LongInt(MESSAGE_TTL_MS));
        arguments.insert("x-max-priority".into(), AMQPValue::LongInt(MAX_PRIORITY));
        arguments.insert(
            "x-overflow".into(),
            AMQPValue::LongString(LongString::from(OVERFLOW_POLICY)),
        );
        arguments.insert(
            "x-dead-letter-exchange".into(),
            AMQPValue::LongString(LongString::from(self.dead_letter_exchange.as_str())),
        );
        arguments.insert(
            "x-dead-letter-routing-key".into(),
            AMQPValue::LongString(LongString::from(self.dead_letter_routing_key.as_str())),
        );
        arguments
    }

    /// Setup steps, in the order they must be applied.
    ///
    /// The dead-letter pair comes first since the main queue names the
    /// dead-letter exchange in its arguments.
    #[must_use]
    pub fn declarations(&self) -> Vec<Declaration> {
        vec![
            Declaration::Exchange {
                name: self.dead_letter_exchange.clone(),
            },
            Declaration::Queue {
                name: self.dead_letter_queue.clone(),
                arguments: FieldTable::default(),
            },
            Declaration::Bind {
                queue: self.dead_letter_queue.clone(),
                exchange: self.dead_letter_exchange.clone(),
                routing_key: self.dead_letter_routing_key.clone(),
            },
            Declaration::Exchange {
                name: self.exchange.clone(),
            },
            Declaration::Queue {
                name: self.queue.clone(),
                arguments: self.queue_arguments(),
            },
            Declaration::Bind {
                queue: self.queue.clone(),
                exchange: self.exchange.clone(),
                routing_key: self.routing_key.clone(),
            },
        ]
    }

    /// Declares every object on `channel`. Declarations are idempotent, so
    /// this is run again after every reconnect.
    ///
    /// # Errors
    ///
    /// Stops at the first failing step and reports which one it was.
    pub async fn declare(&self, channel: &Channel) -> Result<(), BrokerError> {
        for declaration in self.declarations() {
            declaration
                .apply(channel)
                .await
                .map_err(|e| BrokerError::Topology {
                    step: declaration.describe(),
                    reason: e.to_string(),
                })?;
            tracing::debug!(step = %declaration.describe(), "Declared");
        }
        Ok(())
    }
}

mod defaults {
    pub fn exchange() -> String {
        String::from("mailer")
    }

    pub fn queue() -> String {
        String::from("email_queue")
    }

    pub fn routing_key() -> String {
        String::from("email")
    }

    pub fn dead_letter_exchange() -> String {
        String::from("mailer.dlx")
    }

    pub fn dead_letter_queue() -> String {
        String::from("email_dlq")
    }

    pub fn dead_letter_routing_key() -> String {
        String::from("email.failed")
    }
}

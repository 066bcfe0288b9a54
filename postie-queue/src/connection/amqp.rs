use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties,
    options::{
        BasicCancelOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
        ConfirmSelectOptions,
    },
    types::FieldTable,
};
use postie_common::internal;

use super::{ConnectionManager, Dialer, FailureSignal, Link};
use crate::{
    config::{BrokerConfig, ConsumerConfig},
    consumer::{Deliveries, Subscribe, Subscriber},
    delivery::Delivery,
    envelope::RetryEnvelope,
    error::BrokerError,
    scheduler::Publisher,
    topology::Topology,
};

const REPLY_SUCCESS: u16 = 200;

/// Dials RabbitMQ over AMQP 0-9-1 and declares the topology on every link.
#[derive(Debug, Clone)]
pub struct AmqpDialer {
    config: BrokerConfig,
    topology: Topology,
}

impl AmqpDialer {
    #[must_use]
    pub const fn new(config: BrokerConfig, topology: Topology) -> Self {
        Self { config, topology }
    }

    #[must_use]
    pub const fn topology(&self) -> &Topology {
        &self.topology
    }

    async fn configure(&self, connection: &Connection) -> Result<Channel, BrokerError> {
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| BrokerError::Channel(e.to_string()))?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| BrokerError::Channel(e.to_string()))?;

        self.topology.declare(&channel).await?;
        Ok(channel)
    }
}

#[async_trait]
impl Dialer for AmqpDialer {
    type Link = AmqpLink;

    #[tracing::instrument(skip_all, fields(address = %self.config.address(), generation = failure.generation()))]
    async fn dial(&self, failure: FailureSignal) -> Result<AmqpLink, BrokerError> {
        let properties = ConnectionProperties::default()
            .with_connection_name(self.config.connection_name.clone().into());

        let connection = Connection::connect_uri(self.config.uri(), properties)
            .await
            .map_err(|e| BrokerError::Connect {
                address: self.config.address(),
                reason: e.to_string(),
            })?;

        let channel = match self.configure(&connection).await {
            Ok(channel) => channel,
            Err(e) => {
                if let Err(close) = connection.close(REPLY_SUCCESS, "setup failed").await {
                    tracing::debug!(error = %close, "Failed to close half-configured connection");
                }
                return Err(e);
            }
        };

        // Registered last so that a dial which failed part way never reports.
        let signal = failure.clone();
        connection.on_error(move |e| {
            internal!(level = WARN, error = %e, "Broker connection failed");
            signal.trip();
        });
        channel.on_error(move |e| {
            internal!(level = WARN, error = %e, "Broker channel failed");
            failure.trip();
        });

        Ok(AmqpLink {
            connection,
            channel,
        })
    }
}

pub struct AmqpLink {
    connection: Connection,
    channel: Channel,
}

impl AmqpLink {
    /// A handle to the link's channel. Handles are cheap to clone and must
    /// not be kept beyond the operation they were fetched for.
    #[must_use]
    pub fn channel(&self) -> Channel {
        self.channel.clone()
    }
}

#[async_trait]
impl Link for AmqpLink {
    fn is_open(&self) -> bool {
        self.connection.status().connected() && self.channel.status().connected()
    }

    async fn close(&self) {
        if self.channel.status().connected() {
            let closed = self.channel.close(REPLY_SUCCESS, "shutdown").await;
            if let Err(e) = closed {
                tracing::debug!(error = %e, "Failed to close channel");
            }
        }
        if self.connection.status().connected() {
            let closed = self.connection.close(REPLY_SUCCESS, "shutdown").await;
            if let Err(e) = closed {
                tracing::debug!(error = %e, "Failed to close connection");
            }
        }
    }
}

impl Subscribe for AmqpLink {
    type Subscriber = Channel;

    fn subscriber(&self) -> Channel {
        self.channel()
    }
}

#[async_trait]
impl Subscriber for Channel {
    async fn subscribe(
        &self,
        queue: &str,
        config: &ConsumerConfig,
    ) -> Result<Deliveries, BrokerError> {
        self.basic_qos(config.prefetch, BasicQosOptions::default())
            .await
            .map_err(|e| BrokerError::Channel(e.to_string()))?;

        let consumer = self
            .basic_consume(
                queue,
                &config.consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::Subscribe {
                queue: queue.to_string(),
                reason: e.to_string(),
            })?;

        Ok(consumer
            .map(|next| {
                next.map(Delivery::from)
                    .map_err(|e| BrokerError::Stream(e.to_string()))
            })
            .boxed())
    }

    async fn cancel(&self, consumer_tag: &str) {
        if let Err(e) = self
            .basic_cancel(consumer_tag, BasicCancelOptions::default())
            .await
        {
            tracing::debug!(error = %e, "Failed to cancel consumer");
        }
    }
}

#[async_trait]
impl Publisher for ConnectionManager<AmqpDialer> {
    async fn publish(&self, body: &[u8], envelope: &RetryEnvelope) -> Result<(), BrokerError> {
        let channel = self.with_link(AmqpLink::channel).await?;
        let topology = self.dialer().topology();

        let properties = BasicProperties::default()
            .with_delivery_mode(2) // persistent
            .with_content_type("application/json".into())
            .with_headers(envelope.to_headers());

        let confirmation = channel
            .basic_publish(
                &topology.exchange,
                &topology.routing_key,
                BasicPublishOptions::default(),
                body,
                properties,
            )
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))?
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))?;

        if confirmation.is_nack() {
            return Err(BrokerError::Publish(String::from("broker nacked the message")));
        }
        Ok(())
    }
}

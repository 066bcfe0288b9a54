use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use futures_util::{Stream, StreamExt, stream::BoxStream};
use postie_common::{incoming, internal};
use tokio::sync::watch;

use crate::{
    config::ConsumerConfig,
    connection::{ConnectionManager, Dialer, Link},
    delivery::Delivery,
    error::BrokerError,
    pool::WorkerPool,
};

/// A live delivery stream. It ends when the subscription or its link does.
pub type Deliveries = BoxStream<'static, Result<Delivery, BrokerError>>;

/// Opens and cancels subscriptions over one link.
#[async_trait]
pub trait Subscriber: Send + Sync + 'static {
    /// Apply the prefetch limit and start consuming `queue`.
    async fn subscribe(
        &self,
        queue: &str,
        config: &ConsumerConfig,
    ) -> Result<Deliveries, BrokerError>;

    async fn cancel(&self, consumer_tag: &str);
}

/// A link that can carry subscriptions.
pub trait Subscribe: Link {
    type Subscriber: Subscriber;

    /// A handle for one subscribe or cancel. It must not be kept beyond
    /// that operation.
    fn subscriber(&self) -> Self::Subscriber;
}

/// Why a subscription stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// The broker closed the delivery stream, usually with the channel.
    Closed,
    /// Shutdown was requested, or the pool stopped accepting work.
    Shutdown,
}

/// Keeps one subscription on the main queue and feeds the worker pool.
///
/// [`ConsumerLoop::run`] covers a single subscription. [`ConsumerLoop::consume`]
/// keeps resubscribing across link generations until shutdown.
pub struct ConsumerLoop<D: Dialer> {
    connection: Arc<ConnectionManager<D>>,
    queue: String,
    config: ConsumerConfig,
    subscribed: AtomicBool,
}

impl<D> ConsumerLoop<D>
where
    D: Dialer,
    D::Link: Subscribe,
{
    pub fn new(
        connection: Arc<ConnectionManager<D>>,
        queue: impl Into<String>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            connection,
            queue: queue.into(),
            config,
            subscribed: AtomicBool::new(false),
        }
    }

    /// `true` while a subscription is active.
    pub fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::Acquire)
    }

    /// Keep a subscription alive until `shutdown` turns `true`.
    ///
    /// After the stream ends, the next attempt starts as soon as a newer link
    /// generation is installed, or after `reconnect_interval` when the link
    /// itself never failed (e.g. a broker-side cancel).
    pub async fn consume(&self, pool: &WorkerPool, shutdown: watch::Receiver<bool>) {
        let reconnect_interval = self.connection.reconnect_interval();

        loop {
            let generation = self.connection.generation();

            match self.run(pool, stopped(shutdown.clone())).await {
                Ok(StreamEnd::Shutdown) => break,
                Ok(StreamEnd::Closed) => {
                    internal!(level = WARN, generation, "Delivery stream closed");
                }
                Err(e) => {
                    internal!(level = WARN, generation, error = %e, "Failed to subscribe");
                }
            }

            tokio::select! {
                biased;

                () = stopped(shutdown.clone()) => break,
                next = self.connection.wait_for_generation_after(generation) => match next {
                    Ok(next) => internal!(level = INFO, generation = next, "Resubscribing on new link"),
                    Err(_) => break,
                },
                () = tokio::time::sleep(reconnect_interval) => {}
            }
        }
    }

    /// Subscribe to the main queue and feed deliveries into `pool` until the
    /// stream closes or `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// If the broker link is down or the subscription is refused.
    #[tracing::instrument(skip_all, fields(generation = self.connection.generation()))]
    pub async fn run<F>(&self, pool: &WorkerPool, shutdown: F) -> Result<StreamEnd, BrokerError>
    where
        F: Future<Output = ()> + Send,
    {
        let deliveries = self.subscribe().await?;
        self.subscribed.store(true, Ordering::Release);

        let end = drive(deliveries, pool, shutdown).await;

        self.subscribed.store(false, Ordering::Release);

        if end == StreamEnd::Shutdown {
            self.cancel().await;
        }
        internal!(level = INFO, ?end, "Consumer stopped");
        Ok(end)
    }

    async fn subscribe(&self) -> Result<Deliveries, BrokerError> {
        if !self.connection.is_connected() {
            return Err(BrokerError::NotConnected);
        }

        let subscriber = self.connection.with_link(|link| link.subscriber()).await?;
        let deliveries = subscriber.subscribe(&self.queue, &self.config).await?;

        internal!(
            level = INFO,
            queue = %self.queue,
            prefetch = self.config.prefetch,
            "Subscribed"
        );
        Ok(deliveries)
    }

    async fn cancel(&self) {
        let Ok(subscriber) = self.connection.with_link(|link| link.subscriber()).await else {
            return;
        };
        subscriber.cancel(&self.config.consumer_tag).await;
    }
}

/// Resolves once `requested` turns `true`, or once nobody is left to send it.
pub async fn stopped(mut requested: watch::Receiver<bool>) {
    let _ = requested.wait_for(|requested| *requested).await;
}

/// Hand every delivery from `deliveries` to `pool` until the stream ends or
/// `shutdown` resolves.
///
/// Errors on the stream are logged and skipped; the stream ends on its own
/// once the channel is gone.
pub async fn drive<S, F>(deliveries: S, pool: &WorkerPool, shutdown: F) -> StreamEnd
where
    S: Stream<Item = Result<Delivery, BrokerError>>,
    F: Future<Output = ()>,
{
    tokio::pin!(deliveries);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;

            () = &mut shutdown => return StreamEnd::Shutdown,
            next = deliveries.next() => match next {
                Some(Ok(delivery)) => {
                    incoming!(
                        delivery_tag = delivery.tag,
                        retry_count = delivery.envelope.retry_count,
                        "Received delivery"
                    );
                    if !pool.submit(delivery).await {
                        return StreamEnd::Shutdown;
                    }
                }
                Some(Err(e)) => incoming!(level = WARN, error = %e, "Delivery stream error"),
                None => return StreamEnd::Closed,
            },
        }
    }
}

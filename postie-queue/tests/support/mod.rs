//! In-memory stand-ins for the broker seams.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use parking_lot::Mutex;
use postie_common::EmailTask;
use postie_queue::{
    BrokerError, ConsumerConfig, Deliveries, Delivery, Dialer, Dispatcher, FailureSignal, Link,
    Publisher, RetryEnvelope, RetryPolicy, RetryScheduler, Settle, Subscribe, Subscriber,
    TaskHandler, TemporaryError,
};
use tokio::sync::{Notify, mpsc, watch};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Ack(u64),
    Reject(u64),
}

/// Records every ack and reject.
#[derive(Default)]
pub struct RecordingSettle {
    settlements: Mutex<Vec<Settlement>>,
    fail_rejects: AtomicBool,
}

impl RecordingSettle {
    pub fn settlements(&self) -> Vec<Settlement> {
        self.settlements.lock().clone()
    }

    pub fn fail_rejects(&self) {
        self.fail_rejects.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Settle for RecordingSettle {
    async fn ack(&self, tag: u64) -> Result<(), BrokerError> {
        self.settlements.lock().push(Settlement::Ack(tag));
        Ok(())
    }

    async fn reject(&self, tag: u64) -> Result<(), BrokerError> {
        if self.fail_rejects.load(Ordering::SeqCst) {
            return Err(BrokerError::Settle {
                tag,
                reason: "channel closed".to_string(),
            });
        }
        self.settlements.lock().push(Settlement::Reject(tag));
        Ok(())
    }
}

/// A durable queue: publishes are delivered in order to whoever consumes.
///
/// Messages survive [`MemoryBroker::close_consumers`], which ends every
/// open delivery stream the way a channel close does.
pub struct MemoryBroker {
    sender: mpsc::UnboundedSender<(Vec<u8>, RetryEnvelope)>,
    receiver: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<(Vec<u8>, RetryEnvelope)>>>,
    epoch: watch::Sender<u64>,
    published: Mutex<Vec<RetryEnvelope>>,
    next_tag: Arc<AtomicU64>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (epoch, _) = watch::channel(0);
        Self {
            sender,
            receiver: Arc::new(tokio::sync::Mutex::new(receiver)),
            epoch,
            published: Mutex::default(),
            next_tag: Arc::new(AtomicU64::new(1)),
        }
    }
}

struct Consuming {
    receiver: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<(Vec<u8>, RetryEnvelope)>>>,
    epoch: watch::Receiver<u64>,
    opened: u64,
}

impl MemoryBroker {
    /// Envelopes of everything ever published, in order.
    pub fn published(&self) -> Vec<RetryEnvelope> {
        self.published.lock().clone()
    }

    /// Subscribe. Deliveries are settled through `settle`.
    pub fn deliveries(
        &self,
        settle: Arc<RecordingSettle>,
    ) -> impl Stream<Item = Result<Delivery, BrokerError>> + use<> {
        let epoch = self.epoch.subscribe();
        let opened = *epoch.borrow();
        let state = Consuming {
            receiver: Arc::clone(&self.receiver),
            opened,
            epoch,
        };
        let next_tag = Arc::clone(&self.next_tag);

        futures_util::stream::unfold(state, move |mut state| {
            let settle = Arc::clone(&settle);
            let next_tag = Arc::clone(&next_tag);
            async move {
                let opened = state.opened;
                let next = {
                    let mut receiver = state.receiver.lock().await;
                    tokio::select! {
                        next = receiver.recv() => next,
                        _ = state.epoch.wait_for(|epoch| *epoch != opened) => None,
                    }
                };
                let (body, envelope) = next?;
                let tag = next_tag.fetch_add(1, Ordering::SeqCst);
                let delivery = Delivery::new(tag, body, envelope, settle);
                Some((Ok(delivery), state))
            }
        })
    }

    /// End every open delivery stream. Queued messages stay queued.
    pub fn close_consumers(&self) {
        self.epoch.send_modify(|epoch| *epoch += 1);
    }
}

#[async_trait]
impl Publisher for MemoryBroker {
    async fn publish(&self, body: &[u8], envelope: &RetryEnvelope) -> Result<(), BrokerError> {
        self.published.lock().push(envelope.clone());
        self.sender
            .send((body.to_vec(), envelope.clone()))
            .map_err(|e| BrokerError::Publish(e.to_string()))
    }
}

/// Fails a fixed number of times, then succeeds.
#[derive(Default)]
pub struct FlakyHandler {
    failures: AtomicUsize,
    calls: AtomicUsize,
    handled: Mutex<Vec<EmailTask>>,
    succeeded: Notify,
    hang: bool,
}

impl FlakyHandler {
    pub fn failing(times: usize) -> Self {
        Self {
            failures: AtomicUsize::new(times),
            ..Self::default()
        }
    }

    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn handled(&self) -> Vec<EmailTask> {
        self.handled.lock().clone()
    }

    /// Resolves after the next successful call.
    pub async fn succeeded(&self) {
        self.succeeded.notified().await;
    }
}

#[async_trait]
impl TaskHandler for FlakyHandler {
    async fn handle(&self, task: &EmailTask) -> Result<(), TemporaryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.handled.lock().push(task.clone());

        if self.hang {
            std::future::pending::<()>().await;
        }

        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(TemporaryError::Send("421 service not available".to_string()));
        }

        self.succeeded.notify_one();
        Ok(())
    }
}

pub fn task_body() -> Vec<u8> {
    EmailTask {
        to: "a@example.com".to_string(),
        subject: "Hello {{ name }}".to_string(),
        template: "welcome".to_string(),
        data: HashMap::from([("name".to_string(), serde_json::json!("A"))]),
        kind: "welcome".to_string(),
    }
    .encode()
    .expect("task encodes")
}

pub fn dispatcher(
    handler: Arc<dyn TaskHandler>,
    publisher: Arc<dyn Publisher>,
) -> (Arc<Dispatcher>, Arc<RetryScheduler>) {
    let scheduler = Arc::new(RetryScheduler::new(publisher));
    let dispatcher = Arc::new(Dispatcher::new(
        RetryPolicy::default(),
        handler,
        Arc::clone(&scheduler),
        Duration::from_secs(60),
    ));
    (dispatcher, scheduler)
}

/// A dialer whose links fail on command.
///
/// Links dialed by [`FakeDialer::serving`] subscribe to a [`MemoryBroker`];
/// killing a link also ends its delivery stream.
#[derive(Default)]
pub struct FakeDialer {
    dials: AtomicUsize,
    refuse: AtomicUsize,
    links: Mutex<Vec<(FailureSignal, Arc<AtomicBool>)>>,
    broker: Option<(Arc<MemoryBroker>, Arc<RecordingSettle>)>,
    subscriptions: Arc<AtomicUsize>,
}

impl FakeDialer {
    pub fn serving(broker: Arc<MemoryBroker>, settle: Arc<RecordingSettle>) -> Self {
        Self {
            broker: Some((broker, settle)),
            ..Self::default()
        }
    }

    /// Refuse the next `times` dials.
    pub fn refuse(&self, times: usize) {
        self.refuse.store(times, Ordering::SeqCst);
    }

    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    /// Subscriptions opened across every link so far.
    pub fn subscriptions(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }

    /// Break the link of `generation` and report it, the way a broker-side
    /// close does. Reports once per handle, connection and channel.
    pub fn kill(&self, generation: u64) {
        let links = self.links.lock();
        let (signal, open) = links
            .iter()
            .find(|(signal, _)| signal.generation() == generation)
            .expect("no link of that generation");
        open.store(false, Ordering::SeqCst);
        if let Some((broker, _)) = &self.broker {
            broker.close_consumers();
        }
        signal.trip();
        signal.trip();
    }
}

pub struct FakeLink {
    open: Arc<AtomicBool>,
    broker: Option<(Arc<MemoryBroker>, Arc<RecordingSettle>)>,
    subscriptions: Arc<AtomicUsize>,
}

#[async_trait]
impl Link for FakeLink {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

impl Subscribe for FakeLink {
    type Subscriber = FakeSubscriber;

    fn subscriber(&self) -> FakeSubscriber {
        FakeSubscriber {
            open: Arc::clone(&self.open),
            broker: self.broker.clone(),
            subscriptions: Arc::clone(&self.subscriptions),
        }
    }
}

pub struct FakeSubscriber {
    open: Arc<AtomicBool>,
    broker: Option<(Arc<MemoryBroker>, Arc<RecordingSettle>)>,
    subscriptions: Arc<AtomicUsize>,
}

#[async_trait]
impl Subscriber for FakeSubscriber {
    async fn subscribe(
        &self,
        queue: &str,
        _config: &ConsumerConfig,
    ) -> Result<Deliveries, BrokerError> {
        let serving = self
            .broker
            .as_ref()
            .filter(|_| self.open.load(Ordering::SeqCst));
        let Some((broker, settle)) = serving else {
            return Err(BrokerError::Subscribe {
                queue: queue.to_string(),
                reason: "channel closed".to_string(),
            });
        };

        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        Ok(broker.deliveries(Arc::clone(settle)).boxed())
    }

    async fn cancel(&self, _consumer_tag: &str) {}
}

#[async_trait]
impl Dialer for FakeDialer {
    type Link = FakeLink;

    async fn dial(&self, failure: FailureSignal) -> Result<FakeLink, BrokerError> {
        self.dials.fetch_add(1, Ordering::SeqCst);

        let refuse = self.refuse.load(Ordering::SeqCst);
        if refuse > 0 {
            self.refuse.store(refuse - 1, Ordering::SeqCst);
            return Err(BrokerError::Connect {
                address: "localhost:5672".to_string(),
                reason: "connection refused".to_string(),
            });
        }

        let open = Arc::new(AtomicBool::new(true));
        self.links.lock().push((failure, Arc::clone(&open)));
        Ok(FakeLink {
            open,
            broker: self.broker.clone(),
            subscriptions: Arc::clone(&self.subscriptions),
        })
    }
}

use std::{
    sync::{Arc, LazyLock},
    time::Duration,
};

use postie_common::{Signal, internal, logging};
use postie_health::{HealthChecker, HealthConfig, HealthServer};
use postie_mailer::{MailSender, MailerConfig, SmtpMailer};
use postie_queue::{
    AmqpDialer, BrokerConfig, ConnectionManager, ConsumerConfig, ConsumerLoop, Dispatcher,
    RetryPolicy, RetryScheduler, Topology, WorkerPool,
};
use postie_store::{StoreConfig, TaskStore};
use serde::Deserialize;
use tokio::sync::{broadcast, watch};

use crate::processor::MailProcessor;

/// How often readiness is sampled for the health probes.
const PROBE_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Default, Deserialize)]
pub struct Postie {
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub topology: Topology,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub consumer: ConsumerConfig,
    #[serde(default)]
    pub mailer: MailerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub health: HealthConfig,
}

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

#[tracing::instrument(level = "trace")]
async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!(level = INFO, "CTRL+C entered -- Enter it again to force shutdown");
        }
        _ = terminate.recv() => {
            internal!(level = INFO, "Terminate Signal received, shutting down");
        }
    };

    SHUTDOWN_BROADCAST
        .send(Signal::Shutdown)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Interrupted, e.to_string()))?;

    // Resolving ends the controller, so only a second CTRL+C cuts the drain
    // short.
    tokio::signal::ctrl_c().await?;
    internal!(level = WARN, "Forcing shutdown");

    Ok(())
}

/// Turn the first [`Signal::Shutdown`] into a level that any number of
/// waiters can observe, however late they start waiting.
fn shutdown_requested(mut signals: broadcast::Receiver<Signal>) -> watch::Receiver<bool> {
    let (sender, receiver) = watch::channel(false);

    tokio::spawn(async move {
        loop {
            match signals.recv().await {
                Ok(Signal::Shutdown) | Err(broadcast::error::RecvError::Closed) => break,
                Ok(Signal::Finalised) | Err(broadcast::error::RecvError::Lagged(_)) => {}
            }
        }
        sender.send_replace(true);
    });

    receiver
}

/// The long-lived pieces of a running consumer.
struct Runtime {
    connection: Arc<ConnectionManager<AmqpDialer>>,
    consumer: Arc<ConsumerLoop<AmqpDialer>>,
    pool: WorkerPool,
    scheduler: Arc<RetryScheduler>,
}

impl Runtime {
    /// Stop intake, let in-flight work finish and push out pending retries
    /// before closing the broker link.
    async fn drain(&self, timeout: Duration) {
        internal!(level = INFO, "Draining in-flight tasks");
        if !self.pool.shutdown(timeout).await {
            internal!(
                level = WARN,
                "Workers did not finish in time, unsettled deliveries will be redelivered"
            );
        }

        let pending = self.scheduler.pending();
        if !self.scheduler.flush_and_wait(timeout).await {
            internal!(
                level = WARN,
                pending = self.scheduler.pending(),
                "Not every pending retry was republished"
            );
        } else if pending > 0 {
            internal!(level = INFO, pending, "Republished pending retries");
        }

        self.connection.close().await;
    }

    /// Periodically mirror component state into the health checker.
    fn probe(&self, checker: Arc<HealthChecker>) -> tokio::task::JoinHandle<()> {
        let connection = self.connection.clone();
        let consumer = self.consumer.clone();
        let scheduler = self.scheduler.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(PROBE_INTERVAL);
            loop {
                interval.tick().await;
                checker.set_broker_ready(connection.is_connected());
                checker.set_consumer_ready(consumer.is_subscribed());
                checker.set_pending_retries(u64::try_from(scheduler.pending()).unwrap_or(u64::MAX));
            }
        })
    }
}

impl Postie {
    /// Apply environment overrides on top of the file configuration.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        self.broker.apply_env(&lookup);
        self.retry.apply_env(&lookup);
        self.mailer.apply_env(&lookup);
    }

    /// Run the consumer until shutdown.
    ///
    /// # Errors
    ///
    /// This function will return an error if the first broker connection, the
    /// mail sender or the health server cannot be set up.
    #[tracing::instrument(level = "trace", skip_all, err)]
    pub async fn run(self) -> anyhow::Result<()> {
        logging::init();

        internal!(
            level = INFO,
            broker = %self.broker.address(),
            queue = %self.topology.queue,
            workers = self.consumer.workers,
            "Controller running"
        );

        // Subscribe before anything can broadcast.
        let requested = shutdown_requested(SHUTDOWN_BROADCAST.subscribe());

        let dialer = AmqpDialer::new(self.broker.clone(), self.topology.clone());
        let connection = ConnectionManager::connect(dialer, self.broker.reconnect_interval()).await?;

        let store: Arc<dyn TaskStore> = Arc::new(self.store.build());
        let sender: Arc<dyn MailSender> = Arc::new(SmtpMailer::new(&self.mailer)?);
        let processor = Arc::new(MailProcessor::new(
            store,
            sender,
            self.consumer.task_timeout(),
        ));

        let scheduler = Arc::new(RetryScheduler::new(connection.clone()));
        let dispatcher = Arc::new(Dispatcher::new(
            self.retry.clone(),
            processor,
            scheduler.clone(),
            self.consumer.dispatch_timeout(),
        ));

        let runtime = Runtime {
            pool: WorkerPool::new(
                self.consumer.workers,
                self.consumer.queue_capacity,
                dispatcher,
            ),
            consumer: Arc::new(ConsumerLoop::new(
                connection.clone(),
                self.topology.queue.clone(),
                self.consumer.clone(),
            )),
            connection,
            scheduler,
        };

        let mut background = Vec::new();
        if self.health.enabled {
            let checker = Arc::new(HealthChecker::new(self.health.max_pending_retries));
            let server = HealthServer::new(self.health.clone(), checker.clone()).await?;
            background.push(runtime.probe(checker));
            background.push(tokio::spawn(async move {
                if let Err(e) = server.serve(SHUTDOWN_BROADCAST.subscribe()).await {
                    internal!(level = ERROR, error = %e, "Health server failed");
                }
            }));
        }

        let shutdown_timeout = self.consumer.shutdown_timeout();
        let ret = tokio::select! {
            () = async {
                runtime.consumer.consume(&runtime.pool, requested).await;
                runtime.drain(shutdown_timeout).await;
            } => Ok(()),
            r = shutdown() => {
                r
            }
        };

        internal!(level = INFO, "Shutting down...");
        for task in background {
            task.abort();
        }

        ret
    }
}

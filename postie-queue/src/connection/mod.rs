//! Ownership and recovery of the broker link.
//!
//! The [`ConnectionManager`] is the only component that creates or replaces
//! the live link. Everything else borrows it for the duration of a single
//! operation through [`ConnectionManager::with_link`].
//!
//! Links report failures through the [`FailureSignal`] they were dialed with.
//! A failure triggers recovery: the old link is closed and a new one dialed
//! every `reconnect_interval` until one succeeds. Each installed link gets a
//! new generation number, which is how stale failure reports are told apart
//! from current ones and how subscribers learn that they must resubscribe.

mod amqp;

use std::{
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use postie_common::internal;
use tokio::sync::{RwLock, mpsc, watch};

pub use self::amqp::{AmqpDialer, AmqpLink};
use crate::error::BrokerError;

/// Establishes a fully configured link to the broker.
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    type Link: Link;

    /// Dial, open a channel and declare the topology.
    ///
    /// The returned link must call [`FailureSignal::trip`] when it fails.
    async fn dial(&self, failure: FailureSignal) -> Result<Self::Link, BrokerError>;
}

/// A live connection/channel pair.
#[async_trait]
pub trait Link: Send + Sync + 'static {
    /// `true` only if both the connection and the channel are open.
    fn is_open(&self) -> bool;

    async fn close(&self);
}

/// Reports the failure of one link generation to its manager.
#[derive(Debug, Clone)]
pub struct FailureSignal {
    generation: u64,
    sender: mpsc::UnboundedSender<u64>,
}

impl FailureSignal {
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Report that the link has failed. Repeated trips are harmless.
    pub fn trip(&self) {
        // The manager is gone if this fails; there is nothing left to recover.
        let _ = self.sender.send(self.generation);
    }
}

pub struct ConnectionManager<D: Dialer> {
    dialer: D,
    link: RwLock<Option<D::Link>>,
    generation: watch::Sender<u64>,
    failures: mpsc::UnboundedSender<u64>,
    closing: AtomicBool,
    reconnect_interval: Duration,
}

impl<D: Dialer> ConnectionManager<D> {
    /// Dial the broker and start watching the link for failures.
    ///
    /// # Errors
    ///
    /// If the first dial fails. This is a startup error: no recovery is
    /// attempted for a link that never came up.
    pub async fn connect(dialer: D, reconnect_interval: Duration) -> Result<Arc<Self>, BrokerError> {
        let (failures, mut failed) = mpsc::unbounded_channel();

        let link = dialer
            .dial(FailureSignal {
                generation: 1,
                sender: failures.clone(),
            })
            .await?;

        let (generation, _) = watch::channel(1);
        let manager = Arc::new(Self {
            dialer,
            link: RwLock::new(Some(link)),
            generation,
            failures,
            closing: AtomicBool::new(false),
            reconnect_interval,
        });

        let weak: Weak<Self> = Arc::downgrade(&manager);
        tokio::spawn(async move {
            while let Some(generation) = failed.recv().await {
                let Some(manager) = weak.upgrade() else {
                    break;
                };
                manager.recover(generation).await;
            }
        });

        internal!(level = INFO, "Connected to broker");
        Ok(manager)
    }

    pub const fn dialer(&self) -> &D {
        &self.dialer
    }

    pub const fn reconnect_interval(&self) -> Duration {
        self.reconnect_interval
    }

    /// Read-only liveness check. `false` while recovery is in progress.
    pub fn is_connected(&self) -> bool {
        self.link
            .try_read()
            .is_ok_and(|link| link.as_ref().is_some_and(Link::is_open))
    }

    /// Generation of the currently installed link, starting at 1.
    pub fn generation(&self) -> u64 {
        *self.generation.borrow()
    }

    /// Wait until a link newer than `generation` is installed.
    ///
    /// # Errors
    ///
    /// If the manager is closed while waiting.
    pub async fn wait_for_generation_after(&self, generation: u64) -> Result<u64, BrokerError> {
        let mut receiver = self.generation.subscribe();
        let mut closed = receiver.clone();
        let newer = receiver.wait_for(|current| *current > generation);
        tokio::select! {
            result = newer => result.map(|current| *current).map_err(|_| BrokerError::NotConnected),
            _ = closed.wait_for(|_| self.is_closing()) => Err(BrokerError::NotConnected),
        }
    }

    /// Run `f` against the current link.
    ///
    /// The lock is held only while `f` runs, so `f` should copy out what it
    /// needs (a channel handle) rather than do I/O. Waits while recovery is
    /// in progress.
    ///
    /// # Errors
    ///
    /// [`BrokerError::NotConnected`] if no link is installed.
    pub async fn with_link<T>(&self, f: impl FnOnce(&D::Link) -> T + Send) -> Result<T, BrokerError> {
        let link = self.link.read().await;
        link.as_ref().map(f).ok_or(BrokerError::NotConnected)
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Close the link normally and suppress any further recovery.
    pub async fn close(&self) {
        self.closing.store(true, Ordering::Release);
        // Wake anyone waiting for a new generation; there won't be one.
        self.generation.send_modify(|_| {});

        let mut slot = self.link.write().await;
        if let Some(link) = slot.take() {
            link.close().await;
        }
        internal!(level = INFO, "Broker connection closed");
    }

    async fn recover(&self, failed: u64) {
        if self.is_closing() || failed != self.generation() {
            return;
        }

        let mut slot = self.link.write().await;

        // Another report for the same link may have recovered it already.
        if self.is_closing() || failed != self.generation() {
            return;
        }

        internal!(level = WARN, generation = failed, "Broker link lost, reconnecting");

        if let Some(link) = slot.take().filter(Link::is_open) {
            link.close().await;
        }

        let next = failed + 1;
        let mut attempt: u32 = 0;
        loop {
            tokio::time::sleep(self.reconnect_interval).await;
            if self.is_closing() {
                return;
            }
            attempt += 1;

            let signal = FailureSignal {
                generation: next,
                sender: self.failures.clone(),
            };
            match self.dialer.dial(signal).await {
                Ok(link) => {
                    *slot = Some(link);
                    self.generation.send_replace(next);
                    internal!(
                        level = INFO,
                        generation = next,
                        attempt,
                        "Reconnected to broker"
                    );
                    return;
                }
                Err(e) => internal!(
                    level = WARN,
                    attempt,
                    error = %e,
                    "Reconnect failed, retrying in {}s",
                    self.reconnect_interval.as_secs()
                ),
            }
        }
    }
}

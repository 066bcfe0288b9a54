use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use postie_common::internal;
use tokio::{
    sync::{self, mpsc},
    task::JoinSet,
};

use crate::{delivery::Delivery, dispatcher::Dispatcher};

/// Fixed set of workers dispatching deliveries from a bounded queue.
///
/// At most `workers` deliveries are processed at once and at most
/// `capacity` wait for a worker; beyond that [`WorkerPool::submit`] waits,
/// which in turn stops the consumer from pulling more.
pub struct WorkerPool {
    sender: Mutex<Option<mpsc::Sender<Delivery>>>,
    workers: sync::Mutex<JoinSet<()>>,
}

impl WorkerPool {
    /// Spawn the workers. Must be called from within a tokio runtime.
    pub fn new(workers: usize, capacity: usize, dispatcher: Arc<Dispatcher>) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let receiver = Arc::new(sync::Mutex::new(receiver));

        let mut set = JoinSet::new();
        for id in 0..workers.max(1) {
            let receiver = Arc::clone(&receiver);
            let dispatcher = Arc::clone(&dispatcher);
            set.spawn(async move {
                loop {
                    let next = {
                        let mut receiver = receiver.lock().await;
                        receiver.recv().await
                    };
                    let Some(delivery) = next else {
                        break;
                    };
                    let disposition = dispatcher.dispatch(delivery).await;
                    tracing::trace!(worker = id, ?disposition, "Dispatched");
                }
                tracing::trace!(worker = id, "Worker stopped");
            });
        }

        Self {
            sender: Mutex::new(Some(sender)),
            workers: sync::Mutex::new(set),
        }
    }

    /// Queue a delivery for dispatch, waiting while the queue is full.
    ///
    /// Returns `false` once the pool is shutting down. The delivery is then
    /// left unsettled and the broker redelivers it after the channel closes.
    pub async fn submit(&self, delivery: Delivery) -> bool {
        let sender = self.sender.lock().clone();
        match sender {
            Some(sender) => sender.send(delivery).await.is_ok(),
            None => false,
        }
    }

    /// Stop accepting work and wait for queued and in-flight deliveries.
    ///
    /// Workers still busy when `timeout` expires are aborted. Returns `true`
    /// if everything drained in time.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        drop(self.sender.lock().take());

        let mut workers = self.workers.lock().await;
        let drained = tokio::time::timeout(timeout, async {
            while workers.join_next().await.is_some() {}
        })
        .await
        .is_ok();

        if !drained {
            internal!(
                level = WARN,
                remaining = workers.len(),
                "Workers did not drain in time, aborting"
            );
            workers.abort_all();
        }
        drained
    }
}

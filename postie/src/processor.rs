use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use postie_common::{EmailTask, internal, outgoing};
use postie_mailer::MailSender;
use postie_queue::{TaskHandler, TemporaryError};
use postie_store::{TaskId, TaskStatus, TaskStore};

/// Sends a task and keeps its record in step.
///
/// Each attempt gets its own record: `pending` when the attempt starts, then
/// `sent` or `failed` with the error text. A send that outlives
/// `send_timeout` is abandoned and recorded as failed.
pub struct MailProcessor {
    store: Arc<dyn TaskStore>,
    sender: Arc<dyn MailSender>,
    send_timeout: Duration,
}

impl MailProcessor {
    pub fn new(
        store: Arc<dyn TaskStore>,
        sender: Arc<dyn MailSender>,
        send_timeout: Duration,
    ) -> Self {
        Self {
            store,
            sender,
            send_timeout,
        }
    }

    /// Record the outcome of an attempt. The send has already happened, so a
    /// failure here is only logged.
    async fn settle_record(&self, id: &TaskId, status: TaskStatus) {
        let label = status.as_str();
        if let Err(e) = self.store.update_status(id, status).await {
            internal!(
                level = WARN,
                task_id = %id,
                status = label,
                error = %e,
                "Failed to update task record"
            );
        }
    }
}

#[async_trait]
impl TaskHandler for MailProcessor {
    #[tracing::instrument(skip_all, fields(to = %task.to, kind = %task.kind))]
    async fn handle(&self, task: &EmailTask) -> Result<(), TemporaryError> {
        let id = self
            .store
            .create(task, Vec::new())
            .await
            .map_err(|e| TemporaryError::Store(e.to_string()))?;

        let Ok(sent) = tokio::time::timeout(self.send_timeout, self.sender.send(task)).await else {
            let err = TemporaryError::Timeout(self.send_timeout);
            outgoing!(level = WARN, task_id = %id, error = %err, "Email send timed out");
            self.settle_record(&id, TaskStatus::Failed(err.to_string()))
                .await;
            return Err(err);
        };

        match sent {
            Ok(()) => {
                outgoing!(level = INFO, task_id = %id, to = %task.to, "Email sent");
                self.settle_record(&id, TaskStatus::Sent).await;
                Ok(())
            }
            Err(e) => {
                outgoing!(level = WARN, task_id = %id, error = %e, "Email send failed");
                self.settle_record(&id, TaskStatus::Failed(e.to_string()))
                    .await;
                Err(TemporaryError::Send(e.to_string()))
            }
        }
    }
}

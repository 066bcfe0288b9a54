use async_trait::async_trait;
use postie_common::EmailTask;

use crate::{Attachment, Result, TaskId, TaskRecord, TaskStatus};

/// Create/update interface over task records.
#[async_trait]
pub trait TaskStore: Send + Sync + std::fmt::Debug {
    /// Persist a new `pending` record for `task` together with its attachments.
    async fn create(&self, task: &EmailTask, attachments: Vec<Attachment>) -> Result<TaskId>;

    /// Move a record to `status`.
    async fn update_status(&self, id: &TaskId, status: TaskStatus) -> Result<()>;

    /// Fetch a record.
    async fn get(&self, id: &TaskId) -> Result<TaskRecord>;

    /// All record IDs, oldest first.
    async fn list(&self) -> Result<Vec<TaskId>>;
}

use async_trait::async_trait;
use postie_common::EmailTask;

use crate::error::TemporaryError;

/// Processes one decoded task.
///
/// The dispatcher waits for a definitive outcome. Any error is treated as
/// transient and retried according to the retry policy.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &EmailTask) -> Result<(), TemporaryError>;
}

use async_trait::async_trait;
use postie_common::EmailTask;

use crate::error::MailError;

/// Renders and transmits the email described by a task.
#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, task: &EmailTask) -> Result<(), MailError>;
}

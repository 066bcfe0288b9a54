use std::{collections::HashMap, time::SystemTime};

use postie_common::EmailTask;
use serde::{Deserialize, Serialize};

/// Identifier for a task record.
///
/// A ULID, so identifiers sort by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId {
    id: ulid::Ulid,
}

impl TaskId {
    /// Generate a new unique task ID
    #[must_use]
    pub fn generate() -> Self {
        Self {
            id: ulid::Ulid::new(),
        }
    }

    /// Get the underlying ULID
    #[must_use]
    pub const fn ulid(&self) -> ulid::Ulid {
        self.id
    }

    /// Milliseconds since the Unix epoch at which this ID was generated.
    #[must_use]
    pub const fn timestamp_ms(&self) -> u64 {
        self.id.timestamp_ms()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// Where a task record is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Sent,
    /// The send attempt failed; carries the error description.
    Failed(String),
}

impl TaskStatus {
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Failed(_) => "failed",
        }
    }
}

/// A file attached to a task record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// File name relative to the attachments directory.
    pub file: String,
}

/// A persisted task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub to: String,
    pub subject: String,
    pub template: String,
    pub data: HashMap<String, serde_json::Value>,
    pub status: TaskStatus,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
}

impl TaskRecord {
    /// A fresh `pending` record for `task`.
    #[must_use]
    pub fn pending(task: &EmailTask, attachments: Vec<Attachment>) -> Self {
        let now = SystemTime::now();
        Self {
            id: TaskId::generate(),
            to: task.to.clone(),
            subject: task.subject.clone(),
            template: task.template.clone(),
            data: task.data.clone(),
            status: TaskStatus::Pending,
            attachments,
            created_at: now,
            updated_at: now,
        }
    }

    /// The error recorded for a failed task.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        match &self.status {
            TaskStatus::Failed(error) => Some(error),
            _ => None,
        }
    }
}

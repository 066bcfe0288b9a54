//! Persistence of task records.
//!
//! Every processed delivery is mirrored by a [`TaskRecord`] whose status moves
//! from `pending` to either `sent` or `failed`. The consumer only needs the
//! create/update surface of [`TaskStore`]; the in-memory backend is used by
//! the binary when no external store is wired in, and by tests.

pub mod backends;
pub mod config;
pub mod error;
pub mod r#trait;
pub mod types;

pub use backends::MemoryTaskStore;
pub use config::StoreConfig;
pub use error::{Result, StoreError};
pub use r#trait::TaskStore;
pub use types::{Attachment, TaskId, TaskRecord, TaskStatus};

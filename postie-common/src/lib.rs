pub mod logging;
pub mod task;

pub use task::{EmailTask, TaskDecodeError};
pub use tracing;

/// Process-wide lifecycle signal broadcast by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
    Finalised,
}

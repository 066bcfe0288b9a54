//! Email task consumer: configuration, the task processor and the controller
//! that wires broker, sender, store and health probes together.

pub mod config;
pub mod controller;
pub mod processor;

pub use config::ConfigError;
pub use controller::{Postie, SHUTDOWN_BROADCAST};
pub use processor::MailProcessor;

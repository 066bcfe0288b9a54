//! Health check endpoints for postie
//!
//! # Endpoints
//!
//! - **`/health/live`** - Liveness probe: Returns 200 if the process is running
//! - **`/health/ready`** - Readiness probe: Returns 200 if the broker link is up,
//!   the consumer is subscribed and the retry backlog is below its limit
//!
//! # Usage
//!
//! ```rust,no_run
//! use postie_health::{HealthServer, HealthConfig, HealthChecker};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = HealthConfig::default();
//! let health_checker = Arc::new(HealthChecker::new(config.max_pending_retries));
//! let server = HealthServer::new(config, health_checker).await?;
//!
//! // server.serve(shutdown_receiver).await?;
//! # Ok(())
//! # }
//! ```

mod checker;
mod config;
mod error;
mod server;

pub use checker::{HealthChecker, HealthStatus};
pub use config::HealthConfig;
pub use error::HealthError;
pub use server::HealthServer;

//! Policy abstractions for consumer decisions.
//!
//! Policies are pure: no I/O, no clocks. The dispatcher consults them and
//! acts on the answer.
//!
//! - [`RetryPolicy`]: how many requeues a task gets and how long each waits

pub mod retry;

pub use retry::RetryPolicy;

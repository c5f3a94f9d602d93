//! # sipfork infra-common
//!
//! Shared plumbing for the sipfork crates:
//!
//! - `logging`: subscriber setup and structured log contexts
//! - `errors`: a small common error type plus component/operation context
//! - `tasks`: tracked background tasks and cancelable timers
//!
//! Nothing in here knows about SIP. The bridge and fork crates build on it
//! so that shutdown, timers and log output behave the same everywhere.

pub mod errors;
pub mod logging;
pub mod tasks;

pub use errors::types::{Error, Result};
pub use logging::{setup_logging, LogContext, LoggingConfig};
pub use tasks::{TaskHandle, TaskPriority, TaskTracker, Timer};

//! Tracked background tasks and cancelable timers.
//!
//! Everything that outlives a single call into the library (registration
//! attempts, push repetitions, ringing timeouts, storage flushes) is spawned
//! through here so that it can be canceled as a group at shutdown.

mod timer;
mod tracker;

pub use timer::Timer;
pub use tracker::{TaskHandle, TaskPriority, TaskStats, TaskTracker};

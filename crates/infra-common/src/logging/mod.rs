pub mod context;
pub mod setup;

pub use context::LogContext;
pub use setup::{setup_logging, LoggingConfig};

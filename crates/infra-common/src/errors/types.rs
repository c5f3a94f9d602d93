use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors shared by the infrastructure helpers
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("task limit reached for {tracker}: {active} active tasks")]
    TaskLimit { tracker: String, active: usize },

    #[error("{0}")]
    Custom(String),
}

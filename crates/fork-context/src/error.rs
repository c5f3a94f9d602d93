use thiserror::Error;
use uuid::Uuid;

use crate::proxy::ProxyState;

pub type Result<T, E = ForkError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ForkError {
    #[error("fork context is already finished")]
    Finished,

    /// An operation that needs the live context was called while it is
    /// persisted or in transition. This is a caller bug.
    #[error("{method} called in state {actual}, expected {expected}")]
    StateViolation {
        method: &'static str,
        expected: ProxyState,
        actual: ProxyState,
    },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("could not restore fork {uuid}: {reason}")]
    Restore { uuid: Uuid, reason: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("unknown branch '{0}'")]
    UnknownBranch(String),

    #[error("settings error: {0}")]
    Settings(#[from] config::ConfigError),

    #[error("push notification failed: {0}")]
    Push(String),
}

impl From<sqlx::Error> for ForkError {
    fn from(err: sqlx::Error) -> Self {
        ForkError::Storage(err.to_string())
    }
}

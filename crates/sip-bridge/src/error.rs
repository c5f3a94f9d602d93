//! Error types for the bridging engine

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed providers document, unknown pool, bad strategy parameters.
    /// Fatal at load time.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("invalid template '{template}': {reason}")]
    Template { template: String, reason: String },

    /// A template resolved to something that is not a usable SIP URI
    #[error("could not build outgoing request: {0}")]
    Tweak(String),

    #[error(transparent)]
    Uri(#[from] sipfork_sip_core::Error),

    #[error("registration of {account} failed: {reason}")]
    Registration { account: String, reason: String },

    #[error("sql error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("settings error: {0}")]
    Settings(#[from] config::ConfigError),
}

impl Error {
    pub fn configuration<E: std::fmt::Display>(err: E) -> Self {
        Self::Configuration(err.to_string())
    }

    pub fn registration(account: impl ToString, reason: impl Into<String>) -> Self {
        Self::Registration {
            account: account.to_string(),
            reason: reason.into(),
        }
    }
}

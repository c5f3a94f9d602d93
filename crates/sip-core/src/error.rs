use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("invalid SIP URI '{input}': {reason}")]
    InvalidUri { input: String, reason: String },

    #[error("invalid digest challenge: {0}")]
    InvalidChallenge(String),
}

impl Error {
    pub fn invalid_uri(input: &str, reason: impl Into<String>) -> Self {
        Error::InvalidUri {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

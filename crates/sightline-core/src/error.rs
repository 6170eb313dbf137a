use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The server salt is shorter than [`crate::visitor::MIN_SALT_LEN`].
    #[error("salt must be at least {min} characters (got {actual})")]
    SaltTooShort { min: usize, actual: usize },

    #[error("invalid configuration value for {key}: {message}")]
    InvalidConfig { key: &'static str, message: String },

    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    #[error("{0} not found")]
    NotFound(String),
}

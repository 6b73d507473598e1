use thiserror::Error;

#[derive(Debug, Error)]
pub enum PathwatchError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("sink error: {0}")]
    Sink(String),

    #[error("storage error: {0}")]
    Store(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl PathwatchError {
    /// True for errors caused by the request itself rather than by a backend.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::Unauthorized(_) | Self::Parse(_))
    }
}

pub type Result<T> = std::result::Result<T, PathwatchError>;

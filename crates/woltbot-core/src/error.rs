use std::time::Duration;
use thiserror::Error;

/// Top-level error type for woltbot.
#[derive(Debug, Error)]
pub enum WoltbotError {
    /// External call failed in a way that may succeed later (rate limit,
    /// timeout, 5xx). Retried with backoff.
    #[error("transient external error: {0}")]
    Transient(String),

    /// External call failed for good (chat blocked the bot, chat deleted).
    #[error("permanent external error: {0}")]
    Permanent(String),

    /// A referenced record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The platform does not know the requested venue.
    #[error("unknown entity: {0}")]
    UnknownEntity(String),

    /// Persistence layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl WoltbotError {
    /// Whether this error came from the storage layer.
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

/// Failure of a delivery-platform query.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlatformError {
    #[error("platform rate limited the request")]
    RateLimited { retry_after: Option<Duration> },

    #[error("platform unreachable: {0}")]
    Unreachable(String),

    #[error("venue not found: {0}")]
    NotFound(String),

    /// Response did not match the expected shape.
    #[error("malformed platform response: {0}")]
    Malformed(String),
}

impl From<PlatformError> for WoltbotError {
    fn from(e: PlatformError) -> Self {
        match e {
            PlatformError::NotFound(slug) => WoltbotError::UnknownEntity(slug),
            other => WoltbotError::Transient(other.to_string()),
        }
    }
}

/// Failure of a chat delivery.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SendError {
    #[error("messaging platform rate limited the request")]
    RateLimited { retry_after: Option<Duration> },

    /// The chat blocked the bot, was deleted, or the user was deactivated.
    #[error("chat permanently unreachable: {0}")]
    PermanentlyUnreachable(String),

    #[error("messaging platform unreachable: {0}")]
    Unreachable(String),
}

impl SendError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::PermanentlyUnreachable(_))
    }

    /// Server-suggested wait before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<SendError> for WoltbotError {
    fn from(e: SendError) -> Self {
        if e.is_permanent() {
            WoltbotError::Permanent(e.to_string())
        } else {
            WoltbotError::Transient(e.to_string())
        }
    }
}

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ChatError>;

/// Errors surfaced by the chat core.
///
/// `Unauthorized` deliberately carries nothing: a rejected caller learns that it was
/// rejected and nothing about the room it asked for.
#[derive(Error, Debug)]
pub enum ChatError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("transport error: {0}")]
    Transport(String),
}

impl ChatError {
    pub fn invalid<T: Into<String>>(msg: T) -> Self {
        ChatError::InvalidArgument(msg.into())
    }

    pub fn conflict<T: Into<String>>(msg: T) -> Self {
        ChatError::Conflict(msg.into())
    }

    pub fn transport<T: Into<String>>(msg: T) -> Self {
        ChatError::Transport(msg.into())
    }

    /// Whether re-running the same atomic operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChatError::Storage(_) | ChatError::Transport(_))
    }
}

impl From<sqlx::migrate::MigrateError> for ChatError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        ChatError::Storage(sqlx::Error::Migrate(Box::new(err)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_leaks_nothing() {
        assert_eq!(ChatError::Unauthorized.to_string(), "unauthorized");
    }

    #[test]
    fn only_infrastructure_errors_are_retryable() {
        assert!(ChatError::Storage(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(ChatError::transport("closed").is_retryable());
        assert!(!ChatError::invalid("self chat").is_retryable());
        assert!(!ChatError::conflict("regression").is_retryable());
        assert!(!ChatError::NotFound("room").is_retryable());
    }
}

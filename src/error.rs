use sqlx::migrate::MigrateError;
use thiserror::Error;

/// Top-level error type for the entire application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Session-layer precondition violations. These map to user-visible text at
/// the dispatch layer and are never logged as failures.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    #[error("no active session for this channel")]
    NoActiveSession,

    #[error("at least two members are required to settle")]
    TooFewMembers,

    #[error("amount must be positive")]
    InvalidAmount,

    #[error("required session parameters are missing")]
    MissingParameters,
}

/// Outbound gateway failures, split by whether a bounded retry makes sense.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("send timed out")]
    Timeout,

    #[error("transient transport failure: {0}")]
    Transient(String),

    #[error("gateway returned status {0}")]
    Status(u16),

    #[error("transport failure: {0}")]
    Permanent(String),
}

impl GatewayError {
    /// Timeouts, connection-level failures, and server-side (5xx) or
    /// rate-limit (429) statuses are worth a bounded retry; anything else is
    /// treated as permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            GatewayError::Timeout | GatewayError::Transient(_) => true,
            GatewayError::Status(code) => *code >= 500 || *code == 429,
            GatewayError::Permanent(_) => false,
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            GatewayError::Timeout
        } else if error.is_connect() {
            GatewayError::Transient(error.to_string())
        } else {
            GatewayError::Permanent(error.to_string())
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        AppError::Internal(format!("{error:?}"))
    }
}

impl From<MigrateError> for AppError {
    fn from(error: MigrateError) -> Self {
        AppError::Internal(format!("Migration error: {error:?}"))
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(GatewayError::Timeout.is_transient());
        assert!(GatewayError::Status(503).is_transient());
        assert!(GatewayError::Status(429).is_transient());
        assert!(!GatewayError::Status(404).is_transient());
        assert!(!GatewayError::Permanent("boom".into()).is_transient());
    }
}

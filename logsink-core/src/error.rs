//! Error types for Logsink

use thiserror::Error;

/// Result type alias for Logsink operations
pub type Result<T> = std::result::Result<T, SinkError>;

/// Logsink error types
#[derive(Error, Debug)]
pub enum SinkError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Record failed validation
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// Queue stayed full for the whole enqueue wait
    #[error("Event queue is full ({capacity} records), retry later")]
    Backpressure { capacity: usize },

    /// Queue no longer accepts records
    #[error("Event queue is closed")]
    QueueClosed,

    /// Store driver error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Transaction used in an invalid state
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Shutdown step did not finish within its grace period
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SinkError {
    /// Check if the caller should retry the operation later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SinkError::Io(_)
                | SinkError::Backpressure { .. }
                | SinkError::Database(_)
                | SinkError::Transaction(_)
        )
    }

    /// Check if error was caused by the caller's input
    pub fn is_client_error(&self) -> bool {
        matches!(self, SinkError::InvalidRecord(_))
    }
}

impl From<tokio::task::JoinError> for SinkError {
    fn from(err: tokio::task::JoinError) -> Self {
        SinkError::Internal(format!("blocking task failed: {}", err))
    }
}

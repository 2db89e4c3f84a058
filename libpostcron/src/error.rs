//! Error types for Postcron

use thiserror::Error;

use crate::types::PostStatus;

pub type Result<T> = std::result::Result<T, PostcronError>;

#[derive(Error, Debug)]
pub enum PostcronError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("Account error: {0}")]
    Account(#[from] AccountError),

    #[error("Post not found: {0}")]
    NotFound(String),

    #[error("Invalid status transition for post {post_id}: {from} -> {to}")]
    InvalidTransition {
        post_id: String,
        from: PostStatus,
        to: PostStatus,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl PostcronError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            PostcronError::InvalidInput(_) => 3,
            PostcronError::NotFound(_) => 3,
            PostcronError::InvalidTransition { .. } => 1,
            PostcronError::Config(_) => 2,
            PostcronError::Database(_) => 2,
            PostcronError::Publish(PublishError::Authentication(_)) => 2,
            PostcronError::Publish(_) => 1,
            PostcronError::Account(_) => 1,
        }
    }

    /// Whether this error means the post store could not be reached
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, PostcronError::Database(_))
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Corrupt row for post {post_id}: {reason}")]
    CorruptRow { post_id: String, reason: String },
}

/// Failures reported by a publisher.
///
/// `Network`, `Timeout` and `RateLimit` are transient and may be retried within
/// a single dispatch attempt. Everything else is permanent.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Content rejected: {0}")]
    Rejected(String),

    #[error("Publisher reported failure: {0}")]
    NonSuccess(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timed out after {0}s")]
    Timeout(u64),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),
}

impl PublishError {
    /// Transient errors are worth another attempt
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PublishError::Network(_) | PublishError::Timeout(_) | PublishError::RateLimit(_)
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccountError {
    #[error("Account not found: {0}")]
    NotFound(String),
}

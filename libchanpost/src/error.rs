//! Error types for Chanpost

use std::time::Duration;
use thiserror::Error;

pub type Result<T, E = ChanpostError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum ChanpostError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("State store error: {0}")]
    Store(#[from] StoreError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Content source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl ChanpostError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            ChanpostError::InvalidInput(_) => 3,
            ChanpostError::Delivery(DeliveryError::Authentication(_)) => 2,
            ChanpostError::Delivery(_) => 1,
            ChanpostError::Config(_) => 1,
            ChanpostError::Store(_) => 1,
            ChanpostError::SourceUnavailable(_) => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value: {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database operation failed: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure classification for delivery outcomes.
///
/// `Transient` failures are eligible for retry with backoff; `Permanent`
/// failures are surfaced immediately and recorded as terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Transient,
    Permanent,
}

#[derive(Error, Debug, Clone)]
pub enum DeliveryError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Rate limited by remote: {message}")]
    RemoteRateLimit {
        message: String,
        /// Server-suggested wait before the next attempt, when provided.
        retry_after: Option<Duration>,
    },

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Channel not found: {0}")]
    ChannelNotFound(String),

    #[error("Authentication rejected: {0}")]
    Authentication(String),
}

impl DeliveryError {
    pub fn kind(&self) -> FailureKind {
        match self {
            DeliveryError::Network(_)
            | DeliveryError::Timeout(_)
            | DeliveryError::RemoteRateLimit { .. } => FailureKind::Transient,
            DeliveryError::InvalidPayload(_)
            | DeliveryError::ChannelNotFound(_)
            | DeliveryError::Authentication(_) => FailureKind::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == FailureKind::Transient
    }
}

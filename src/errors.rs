//! Error types for apt-batch.
//!
//! Metadata queries and the execution engine return these errors directly.
//! Stanza parsing does not: a stanza with a missing required field is skipped
//! and reported through [`crate::control::SkipReason`] instead.

use thiserror::Error;

/// The main error type for apt-batch operations.
#[derive(Debug, Error)]
pub enum AptBatchError {
    /// A read-only package-manager query wrote to its error stream or could not run
    #[error("Query failed: {0}")]
    Query(String),

    /// The privileged batch process could not be started or exposed no usable streams
    #[error("Failed to spawn batch process: {0}")]
    Spawn(String),

    /// The privileged batch process reported data on its error stream
    #[error("Batch error: {0}")]
    Batch(String),

    /// A mutating queue operation was attempted while a batch is executing
    #[error("Operation queue is busy: {0}")]
    Busy(String),

    /// Configuration-related errors (file parsing, validation, etc.)
    #[error("Configuration error: {0}")]
    Config(#[from] anyhow::Error),

    /// File I/O operation failures
    #[error("I/O operation failed: {0}")]
    Io(#[from] std::io::Error),

    /// Package name or version rejected before it reaches a shell
    #[error("Invalid package: {0}")]
    InvalidPackage(String),

    /// Commit was requested with nothing queued
    #[error("Nothing to commit: the operation queue is empty")]
    EmptyQueue,

    /// Concurrent access or locking errors
    #[error("Concurrency error: {0}")]
    Concurrency(String),
}

/// A type alias for Results that use AptBatchError.
pub type Result<T> = std::result::Result<T, AptBatchError>;

impl AptBatchError {
    /// Creates a new Query error with the command that failed.
    pub fn query<S1, S2>(cmd: S1, details: S2) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        AptBatchError::Query(format!("{}: {}", cmd.into(), details.into()))
    }

    /// Creates a new Spawn error with context.
    pub fn spawn<S1, S2>(program: S1, details: S2) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        AptBatchError::Spawn(format!("{}: {}", program.into(), details.into()))
    }

    /// Creates a new InvalidPackage error with context.
    pub fn invalid_package<S1, S2>(package: S1, reason: S2) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        AptBatchError::InvalidPackage(format!("{}: {}", package.into(), reason.into()))
    }

    /// Returns true if this error represents a transient failure that a caller may retry.
    ///
    /// Nothing inside the crate retries on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AptBatchError::Query(_) | AptBatchError::Io(_))
    }

    /// Returns the error category as a string for logging.
    pub fn category(&self) -> &'static str {
        match self {
            AptBatchError::Query(_) => "query",
            AptBatchError::Spawn(_) => "spawn",
            AptBatchError::Batch(_) => "batch",
            AptBatchError::Busy(_) => "busy",
            AptBatchError::Config(_) => "config",
            AptBatchError::Io(_) => "io",
            AptBatchError::InvalidPackage(_) => "invalid_package",
            AptBatchError::EmptyQueue => "empty_queue",
            AptBatchError::Concurrency(_) => "concurrency",
        }
    }
}

impl From<config::ConfigError> for AptBatchError {
    fn from(err: config::ConfigError) -> Self {
        AptBatchError::Config(anyhow::Error::from(err))
    }
}

impl From<validator::ValidationErrors> for AptBatchError {
    fn from(err: validator::ValidationErrors) -> Self {
        AptBatchError::Config(anyhow::Error::from(err))
    }
}

impl<T> From<std::sync::PoisonError<T>> for AptBatchError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        AptBatchError::Concurrency(format!("Mutex poisoned: {}", err))
    }
}

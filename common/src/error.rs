//! Error types for lockmesh operations.
//!
//! Grant/deny outcomes are ordinary return values, never errors; the variants
//! here cover lifecycle misuse, configuration problems and transport faults.

use crate::NodeId;
use thiserror::Error;

/// Main error type for lockmesh operations.
#[derive(Error, Debug)]
pub enum LockError {
    /// The named manager instance is not running.
    #[error("lock manager '{0}' is not running")]
    NotRunning(String),

    /// The named manager instance was already started.
    #[error("lock manager '{0}' is already running")]
    AlreadyRunning(String),

    /// Remote node unreachable.
    #[error("node unreachable: {0}")]
    Unreachable(NodeId),

    /// Remote call timed out.
    #[error("remote call timed out on node {0}")]
    Timeout(NodeId),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl LockError {
    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LockError::Unreachable(_) | LockError::Timeout(_))
    }
}

/// Result type alias for lockmesh operations.
pub type Result<T> = std::result::Result<T, LockError>;

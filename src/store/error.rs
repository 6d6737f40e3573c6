//! Error types for coordination store operations

use std::fmt;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by a coordination store backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Node does not exist
    NodeNotFound { path: String },

    /// Node already exists
    NodeExists { path: String },

    /// Path is not a valid absolute node path
    InvalidPath { path: String },

    /// The client is currently disconnected from the store
    ConnectionLoss,

    /// A multi-operation transaction was rejected as a whole
    TransactionFailed { reason: String },

    /// Backend-specific failure
    Backend { reason: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NodeNotFound { path } => write!(f, "Node not found: {}", path),
            Self::NodeExists { path } => write!(f, "Node already exists: {}", path),
            Self::InvalidPath { path } => write!(f, "Invalid node path: '{}'", path),
            Self::ConnectionLoss => write!(f, "Connection to coordination store lost"),
            Self::TransactionFailed { reason } => write!(f, "Transaction failed: {}", reason),
            Self::Backend { reason } => write!(f, "Store backend error: {}", reason),
        }
    }
}

impl std::error::Error for StoreError {}

impl StoreError {
    /// Create a node-not-found error
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NodeNotFound { path: path.into() }
    }

    /// Create a node-exists error
    pub fn exists(path: impl Into<String>) -> Self {
        Self::NodeExists { path: path.into() }
    }

    /// Create a transaction failure
    pub fn transaction(reason: impl Into<String>) -> Self {
        Self::TransactionFailed {
            reason: reason.into(),
        }
    }

    /// Check if the operation may succeed when retried
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionLoss | Self::TransactionFailed { .. } | Self::Backend { .. }
        )
    }
}

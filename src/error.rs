//! Unified error handling for the shardkeeper crate
//!
//! Domain-specific errors (such as [`StoreError`]) are wrapped by a single
//! [`Error`] enum so services can propagate with `?` across module
//! boundaries, while callers can still classify failures.
//!
//! # Usage
//!
//! ```rust,ignore
//! use shardkeeper::error::{Error, ErrorCategory};
//!
//! fn handle_error(err: Error) {
//!     if err.is_recoverable() {
//!         tracing::warn!(error = %err, "Skipping this cycle, will retry");
//!     } else {
//!         tracing::error!(error = %err, "Fatal coordination error");
//!     }
//! }
//! ```

use std::time::Duration;
use thiserror::Error;

pub use crate::store::StoreError;

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Coordination store access failures
    Store,
    /// Contention or protocol-level coordination failures
    Coordination,
    /// Host environment problems an operator must fix (clock skew)
    Environment,
    /// Configuration and validation errors
    Config,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Short human readable label
    pub fn label(&self) -> &'static str {
        match self {
            Self::Store => "store error",
            Self::Coordination => "coordination error",
            Self::Environment => "environment error",
            Self::Config => "configuration error",
            Self::Other => "other error",
        }
    }
}

/// Unified error type for the shardkeeper crate
#[derive(Error, Debug)]
pub enum Error {
    /// Coordination store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Distributed mutex could not be acquired in time
    #[error("Timed out after {timeout_ms}ms waiting for lock '{name}'")]
    LockTimeout { name: String, timeout_ms: u64 },

    /// Local clock drifted too far from the store clock
    #[error(
        "Time difference between local host and coordination store is {time_diff_ms}ms, \
         exceeding the tolerated {max_ms}ms"
    )]
    TimeDiffIntolerable { time_diff_ms: i64, max_ms: i64 },

    /// Job name already registered with a different job class
    #[error(
        "Job '{job_name}' is registered with class '{registered_class}', \
         refusing to register it as '{new_class}'"
    )]
    ConfigurationConflict {
        job_name: String,
        registered_class: String,
        new_class: String,
    },

    /// Invalid configuration value
    #[error("Invalid config '{field}': {reason}")]
    InvalidConfig { field: String, reason: String },

    /// Job is unknown to the process registry or the store
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// Job is already registered in this process
    #[error("Job already registered: {0}")]
    JobAlreadyRegistered(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl Error {
    /// Create a lock timeout error
    pub fn lock_timeout(name: impl Into<String>, timeout: Duration) -> Self {
        Self::LockTimeout {
            name: name.into(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Check if this error is recoverable (retry on the next cycle)
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_recoverable(),
            Self::LockTimeout { .. } => true,
            Self::TimeDiffIntolerable { .. }
            | Self::ConfigurationConflict { .. }
            | Self::InvalidConfig { .. }
            | Self::JobNotFound(_)
            | Self::JobAlreadyRegistered(_)
            | Self::Json(_)
            | Self::Other { .. } => false,
        }
    }

    /// Get the error category for handling strategies
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Store(_) => ErrorCategory::Store,
            Self::LockTimeout { .. } => ErrorCategory::Coordination,
            Self::TimeDiffIntolerable { .. } => ErrorCategory::Environment,
            Self::ConfigurationConflict { .. }
            | Self::InvalidConfig { .. }
            | Self::JobNotFound(_)
            | Self::JobAlreadyRegistered(_)
            | Self::Json(_) => ErrorCategory::Config,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            context: err.to_string(),
            source: None,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;

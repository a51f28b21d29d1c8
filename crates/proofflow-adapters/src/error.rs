//! Adapter error types.
//!
//! Every failure to run an external program surfaces as an [`AdapterError`].
//! A program that runs and exits nonzero is *not* an error at this layer; the
//! exit code is reported in [`crate::ProcessOutput`] and callers decide.

use std::time::Duration;

/// Unified error type for proofflow adapters.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// The configured command line is unusable (e.g. empty).
    #[error("invalid command: {reason}")]
    InvalidCommand { reason: String },

    /// The program could not be started.
    #[error("failed to spawn `{program}`: {reason}")]
    SpawnFailed { program: String, reason: String },

    /// The program started but waiting on it failed.
    #[error("process error for `{program}`: {reason}")]
    ExecutionFailed { program: String, reason: String },

    /// The program exceeded its wall-clock budget and was killed.
    #[error("`{program}` timed out after {limit:?}")]
    Timeout { program: String, limit: Duration },

    /// An I/O operation failed within the adapter.
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
}

impl AdapterError {
    /// Whether this error is a budget overrun rather than a launch failure.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Convenience alias used throughout the adapters crate.
pub type Result<T> = std::result::Result<T, AdapterError>;

//! Workflow engine error types.
//!
//! Compile and execute failures have their own enums because callers turn
//! them into distinct response payloads.  [`IntentError`] wraps both for code
//! that only needs to propagate.

use std::time::Duration;

// ---------------------------------------------------------------------------
// Compile errors
// ---------------------------------------------------------------------------

/// Failure to turn a command into an executable step graph.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    /// The completion provider did not answer within the compile budget.
    #[error("timeout")]
    Timeout,

    /// The provider failed or answered with something that is not a step graph.
    #[error("provider error: {0}")]
    ProviderError(String),

    /// The answer parsed but contained no usable steps.
    #[error("no executable steps")]
    EmptyResult,
}

// ---------------------------------------------------------------------------
// Execute errors
// ---------------------------------------------------------------------------

/// Failure of the external workflow executor.
#[derive(Debug, thiserror::Error)]
pub enum ExecuteError {
    /// The executor exceeded its wall-clock budget and was killed.
    #[error("workflow executor timed out after {limit:?}")]
    Timeout { limit: Duration },

    /// The executor ran and reported failure.
    #[error("workflow executor exited with code {exit_code}")]
    NonzeroExit {
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    /// The executor could not be started, or its artifact could not be written.
    #[error("workflow executor could not run: {reason}")]
    Process { reason: String },
}

impl ExecuteError {
    /// Most useful human-readable detail: stderr, then stdout, then the
    /// error itself.
    pub fn detail(&self) -> String {
        match self {
            Self::NonzeroExit { stdout, stderr, .. } => {
                if !stderr.trim().is_empty() {
                    stderr.clone()
                } else if !stdout.trim().is_empty() {
                    stdout.clone()
                } else {
                    "Workflow execution failed".to_owned()
                }
            }
            other => other.to_string(),
        }
    }
}

impl From<proofflow_adapters::AdapterError> for ExecuteError {
    fn from(err: proofflow_adapters::AdapterError) -> Self {
        match err {
            proofflow_adapters::AdapterError::Timeout { limit, .. } => Self::Timeout { limit },
            other => Self::Process {
                reason: other.to_string(),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Unified error
// ---------------------------------------------------------------------------

/// Unified error type for the workflow engine.
#[derive(Debug, thiserror::Error)]
pub enum IntentError {
    // -- Pipeline stages -----------------------------------------------------
    #[error("compile failed: {0}")]
    Compile(#[from] CompileError),

    /// The graph violates causal ordering; each entry names a violated key.
    #[error("validation failed: {}", violations.join("; "))]
    ValidationFailed { violations: Vec<String> },

    #[error("execution failed: {0}")]
    Execute(#[from] ExecuteError),

    /// The status-lookup process could not be run.
    #[error("status poll failed: {reason}")]
    StatusPoll { reason: String },

    /// The status-lookup process exceeded its budget and was killed.
    #[error("status poll timed out after {limit:?}")]
    StatusPollTimeout { limit: Duration },

    // -- Setup ---------------------------------------------------------------
    /// A built-in pattern failed to compile.
    #[error("invalid pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("config error: {reason}")]
    Config { reason: String },

    // -- Upstream crate errors -----------------------------------------------
    #[error("adapter error: {0}")]
    Adapter(#[from] proofflow_adapters::AdapterError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias used throughout the intent crate.
pub type Result<T> = std::result::Result<T, IntentError>;

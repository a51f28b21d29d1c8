//! External process adapters for proofflow.
//!
//! The proof engine, the payment-rail scripts and the status-lookup script are
//! all separate programs.  [`process::ProcessRunner`] is the only place that
//! spawns them: it pins the working directory, enforces a wall-clock budget,
//! kills the child when the budget is exceeded, and captures both output
//! streams.

pub mod error;
pub mod process;

pub use error::{AdapterError, Result};
pub use process::{CommandLine, ProcessOutput, ProcessRunner};

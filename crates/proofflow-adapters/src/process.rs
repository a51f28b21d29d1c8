//! Bounded subprocess execution.
//!
//! Wraps `tokio::process::Command` with a working directory, a wall-clock
//! timeout and output capture.  The child is spawned with
//! `kill_on_drop(true)`, so when the timeout fires and the wait future is
//! dropped the process is terminated rather than left running.

use std::ffi::OsStr;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{AdapterError, Result};

/// Default output cap per stream (8 MiB).
const DEFAULT_MAX_OUTPUT_BYTES: usize = 8 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Command line
// ---------------------------------------------------------------------------

/// A program plus its fixed leading arguments, e.g.
/// `["node", "workflowCLI.js"]`.  Per-call arguments are appended at run time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct CommandLine {
    program: String,
    args: Vec<String>,
}

impl CommandLine {
    /// Build from already-split parts.  The first part is the program.
    pub fn new<I, S>(parts: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut parts = parts.into_iter().map(Into::into);
        let program = parts
            .next()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| AdapterError::InvalidCommand {
                reason: "command line is empty".into(),
            })?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }

    /// Build from a known program name and its arguments.
    pub fn from_program<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Split a whitespace-separated command string (no shell quoting).
    pub fn parse(line: &str) -> Result<Self> {
        Self::new(line.split_whitespace())
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl TryFrom<Vec<String>> for CommandLine {
    type Error = AdapterError;

    fn try_from(parts: Vec<String>) -> Result<Self> {
        Self::new(parts)
    }
}

impl From<CommandLine> for Vec<String> {
    fn from(cmd: CommandLine) -> Self {
        std::iter::once(cmd.program).chain(cmd.args).collect()
    }
}

impl std::fmt::Display for CommandLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Captured result of a process that ran to termination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code, or -1 when the process was terminated by a signal.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    pub elapsed: Duration,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Runs external programs under a fixed working directory and time budget.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    working_dir: Option<PathBuf>,
    timeout: Duration,
    max_output_bytes: usize,
}

impl ProcessRunner {
    pub fn new(timeout: Duration) -> Self {
        Self {
            working_dir: None,
            timeout,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }

    /// Run children in `dir` instead of the current directory.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_max_output_bytes(mut self, bytes: usize) -> Self {
        self.max_output_bytes = bytes;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `command` with `extra_args` appended and wait for it to exit.
    ///
    /// Returns `Ok` for any exit code; only spawn failures, wait failures and
    /// timeouts are errors.
    pub async fn run<A>(&self, command: &CommandLine, extra_args: &[A]) -> Result<ProcessOutput>
    where
        A: AsRef<OsStr>,
    {
        let program = command.program().to_owned();
        let mut cmd = tokio::process::Command::new(command.program());
        cmd.args(command.args())
            .args(extra_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        debug!(
            command = %command,
            timeout_ms = self.timeout.as_millis() as u64,
            "spawning external process"
        );

        let started = Instant::now();
        let child = cmd.spawn().map_err(|e| AdapterError::SpawnFailed {
            program: program.clone(),
            reason: e.to_string(),
        })?;

        // `wait_with_output` owns the child; dropping it on timeout kills it.
        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let exit_code = output.status.code().unwrap_or(-1);
                let (stdout, stdout_truncated) =
                    truncate_output(&output.stdout, self.max_output_bytes);
                let (stderr, stderr_truncated) =
                    truncate_output(&output.stderr, self.max_output_bytes);
                let elapsed = started.elapsed();

                debug!(
                    program = %program,
                    exit_code,
                    stdout_truncated,
                    stderr_truncated,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "process exited"
                );

                Ok(ProcessOutput {
                    exit_code,
                    stdout,
                    stderr,
                    stdout_truncated,
                    stderr_truncated,
                    elapsed,
                })
            }
            Ok(Err(e)) => Err(AdapterError::ExecutionFailed {
                program,
                reason: e.to_string(),
            }),
            Err(_) => {
                warn!(
                    program = %program,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "process timed out and was killed"
                );
                Err(AdapterError::Timeout {
                    program,
                    limit: self.timeout,
                })
            }
        }
    }
}

/// Convert raw output to lossy UTF-8, capped at `max` bytes.
/// Returns `(output_string, was_truncated)`.
fn truncate_output(raw: &[u8], max: usize) -> (String, bool) {
    if raw.len() <= max {
        (String::from_utf8_lossy(raw).into_owned(), false)
    } else {
        let mut s = String::from_utf8_lossy(&raw[..max]).into_owned();
        s.push_str("\n... [output truncated]");
        (s, true)
    }
}

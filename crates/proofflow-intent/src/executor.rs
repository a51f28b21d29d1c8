//! Workflow executor.
//!
//! A whole graph runs as one external process invocation: the graph is
//! materialized, the executor program is started with
//! `--parsed-file <artifact>`, and its output is scraped by the
//! [`ResultExtractor`].  The exit code alone decides success.

use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsStr;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use proofflow_adapters::{CommandLine, ProcessRunner};

use crate::augment::{AUGMENT_UNAVAILABLE, AiDispatcher};
use crate::config::PipelineConfig;
use crate::error::{ExecuteError, Result};
use crate::extractor::{ProofRecord, ResultExtractor};
use crate::materializer::{Materializer, WorkflowId};
use crate::workflow::WorkflowGraph;

/// Outcome of a run that exited with status zero.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    pub workflow_id: WorkflowId,
    pub transfer_ids: BTreeSet<String>,
    pub proof_summary: BTreeMap<String, ProofRecord>,
    /// Tail of the executor's standard output.
    pub execution_log: String,
    #[serde(rename = "ai_response", skip_serializing_if = "Option::is_none")]
    pub ai_response: Option<String>,
    /// Lines the executor marked as failed; informational only.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<String>,
}

pub struct WorkflowExecutor {
    runner: ProcessRunner,
    command: CommandLine,
    materializer: Materializer,
    extractor: ResultExtractor,
    log_tail_chars: usize,
    augmenter: Option<Arc<AiDispatcher>>,
}

impl WorkflowExecutor {
    pub fn new(runner: ProcessRunner, command: CommandLine, materializer: Materializer) -> Result<Self> {
        Ok(Self {
            runner,
            command,
            materializer,
            extractor: ResultExtractor::new()?,
            log_tail_chars: 1000,
            augmenter: None,
        })
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let mut runner = ProcessRunner::new(config.execute_timeout());
        if let Some(dir) = &config.executor_working_dir {
            runner = runner.with_working_dir(dir.clone());
        }
        Ok(Self::new(
            runner,
            config.executor.clone(),
            Materializer::new(config.artifact_dir.clone()),
        )?
        .with_log_tail(config.log_tail_chars))
    }

    pub fn with_log_tail(mut self, chars: usize) -> Self {
        self.log_tail_chars = chars;
        self
    }

    /// Attach the dispatcher used for `process_with_ai` steps.
    pub fn with_augmenter(mut self, augmenter: Arc<AiDispatcher>) -> Self {
        self.augmenter = Some(augmenter);
        self
    }

    /// Run `graph` under `id`.  The artifact is gone when this returns,
    /// whatever the outcome, and also when the future is dropped early.
    pub async fn execute(
        &self,
        graph: &WorkflowGraph,
        id: &WorkflowId,
    ) -> std::result::Result<ExecutionResult, ExecuteError> {
        let artifact = self
            .materializer
            .materialize(graph, id)
            .await
            .map_err(|e| ExecuteError::Process {
                reason: format!("could not write workflow artifact: {e}"),
            })?;

        info!(workflow_id = %id, steps = graph.steps.len(), command = %self.command, "starting workflow executor");
        let outcome = self
            .runner
            .run(
                &self.command,
                &[OsStr::new("--parsed-file"), artifact.path().as_os_str()],
            )
            .await;
        drop(artifact);

        let output = outcome.inspect_err(|e| warn!(workflow_id = %id, error = %e, "workflow executor did not finish"))?;

        if !output.success() {
            warn!(workflow_id = %id, exit_code = output.exit_code, "workflow executor failed");
            return Err(ExecuteError::NonzeroExit {
                exit_code: output.exit_code,
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }

        let extraction = self.extractor.extract(&output.stdout);

        let ai_response = match graph.ai_request() {
            Some((request, context)) => Some(match &self.augmenter {
                Some(augmenter) => {
                    augmenter
                        .augment(request, context, &extraction.proof_summary, &graph.description)
                        .await
                }
                None => AUGMENT_UNAVAILABLE.to_owned(),
            }),
            None => None,
        };

        info!(
            workflow_id = %id,
            elapsed_ms = output.elapsed.as_millis() as u64,
            transfers = extraction.transfer_ids.len(),
            proofs = extraction.proof_summary.len(),
            "workflow executed"
        );

        Ok(ExecutionResult {
            success: true,
            workflow_id: id.clone(),
            transfer_ids: extraction.transfer_ids,
            proof_summary: extraction.proof_summary,
            execution_log: tail(&output.stdout, self.log_tail_chars).to_owned(),
            ai_response,
            failures: extraction.failures,
        })
    }
}

/// Last `max_chars` characters of `text`.
fn tail(text: &str, max_chars: usize) -> &str {
    if max_chars == 0 {
        return "";
    }
    match text.char_indices().rev().nth(max_chars - 1) {
        Some((start, _)) => &text[start..],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::time::Duration;

    use serde_json::Map;

    use super::*;
    use crate::workflow::StepKind;

    fn sh(script: &str) -> CommandLine {
        CommandLine::new(["sh", "-c", script, "sh"]).unwrap()
    }

    fn executor(dir: &Path, script: &str, timeout: Duration) -> WorkflowExecutor {
        WorkflowExecutor::new(ProcessRunner::new(timeout), sh(script), Materializer::new(dir)).unwrap()
    }

    fn graph() -> WorkflowGraph {
        WorkflowGraph::new(
            "Generate KYC proof",
            vec![(
                "Generate KYC proof".into(),
                StepKind::GenerateProof {
                    proof_type: "kyc".into(),
                    person: None,
                    parameters: Map::new(),
                },
            )],
        )
    }

    fn is_empty_dir(dir: &Path) -> bool {
        std::fs::read_dir(dir).unwrap().next().is_none()
    }

    #[test]
    fn tail_counts_characters() {
        assert_eq!(tail("abcdef", 3), "def");
        assert_eq!(tail("ab", 10), "ab");
        assert_eq!(tail("✅✅✅", 2), "✅✅");
        assert_eq!(tail("abc", 0), "");
    }

    #[tokio::test]
    async fn success_reads_artifact_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let script = r#"test "$1" = --parsed-file || exit 9
grep -q generate_proof "$2" || exit 8
echo "kyc: ✅ generated (proof_kyc_9)""#;
        let exec = executor(dir.path(), script, Duration::from_secs(10));
        let id = WorkflowId::new();

        let result = exec.execute(&graph(), &id).await.unwrap();
        assert!(result.success);
        assert_eq!(result.workflow_id, id);
        assert_eq!(result.proof_summary["kyc"].proof_id.as_deref(), Some("proof_kyc_9"));
        assert_eq!(result.ai_response, None);
        assert!(is_empty_dir(dir.path()));
    }

    #[tokio::test]
    async fn nonzero_exit_carries_output_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(dir.path(), "echo partial; echo boom >&2; exit 2", Duration::from_secs(10));

        let err = exec.execute(&graph(), &WorkflowId::new()).await.unwrap_err();
        match &err {
            ExecuteError::NonzeroExit { exit_code, stdout, .. } => {
                assert_eq!(*exit_code, 2);
                assert_eq!(stdout.trim(), "partial");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.detail().trim(), "boom");
        assert!(is_empty_dir(dir.path()));
    }

    #[tokio::test]
    async fn timeout_is_typed_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(dir.path(), "exec sleep 30", Duration::from_millis(200));

        let err = exec.execute(&graph(), &WorkflowId::new()).await.unwrap_err();
        assert!(matches!(err, ExecuteError::Timeout { .. }));
        assert!(is_empty_dir(dir.path()));
    }

    #[tokio::test]
    async fn missing_program_is_process_error_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let exec = WorkflowExecutor::new(
            ProcessRunner::new(Duration::from_secs(5)),
            CommandLine::new(["proofflow-no-such-program"]).unwrap(),
            Materializer::new(dir.path()),
        )
        .unwrap();

        let err = exec.execute(&graph(), &WorkflowId::new()).await.unwrap_err();
        assert!(matches!(err, ExecuteError::Process { .. }));
        assert!(is_empty_dir(dir.path()));
    }

    #[tokio::test]
    async fn ai_step_without_dispatcher_gets_apology() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(dir.path(), "true", Duration::from_secs(5));
        let graph = WorkflowGraph::new(
            "list proofs and explain",
            vec![
                ("List proofs".into(), StepKind::ListProofs { list_type: None }),
                (
                    "Explain".into(),
                    StepKind::ProcessWithAi {
                        request: "explain".into(),
                        context: "zero-knowledge proofs".into(),
                    },
                ),
            ],
        );
        let result = exec.execute(&graph, &WorkflowId::new()).await.unwrap();
        assert_eq!(result.ai_response.as_deref(), Some(AUGMENT_UNAVAILABLE));
    }
}

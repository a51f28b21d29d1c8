//! Command pipeline: classify, compile, validate, execute.
//!
//! One [`Pipeline`] serves every request.  It holds no per-request state, so
//! concurrent runs only share the artifact directory, where names are unique
//! per workflow.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use proofflow_agent::CompletionProvider;

use crate::augment::AiDispatcher;
use crate::classifier::{Classification, CommandClassifier};
use crate::compiler::WorkflowCompiler;
use crate::config::{CompilerMode, PipelineConfig, ValidationPolicy};
use crate::error::{CompileError, ExecuteError, IntentError, Result};
use crate::executor::{ExecutionResult, WorkflowExecutor};
use crate::materializer::{UiStep, WorkflowId, ui_steps};
use crate::rules::RuleCompiler;
use crate::validator::{self, ValidationReport};
use crate::workflow::WorkflowGraph;

pub const SUCCESS_MESSAGE: &str = "Workflow executed successfully";
const COMPILE_DETAILS: &str = "Failed to parse workflow. Please check command syntax.";

/// Which compiler produced a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompileRoute {
    Rules,
    Llm,
}

/// A compiled and validated graph, ready to execute.
#[derive(Debug, Clone)]
pub struct CompiledWorkflow {
    pub graph: WorkflowGraph,
    pub classification: Classification,
    pub route: CompileRoute,
    pub validation: ValidationReport,
}

/// Everything one command produced, successful or not.
#[derive(Debug)]
pub struct WorkflowRun {
    pub workflow_id: WorkflowId,
    pub command: String,
    /// `None` when compilation failed.
    pub compiled: Option<CompiledWorkflow>,
    pub result: std::result::Result<ExecutionResult, IntentError>,
}

impl WorkflowRun {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }

    pub fn graph(&self) -> Option<&WorkflowGraph> {
        self.compiled.as_ref().map(|c| &c.graph)
    }

    /// Response payload with an explicit `success` discriminator.
    pub fn report(&self) -> Value {
        match &self.result {
            Ok(result) => {
                let steps: Vec<UiStep> = self.graph().map(ui_steps).unwrap_or_default();
                let mut body = serde_json::to_value(result).unwrap_or_else(|_| json!({"success": true}));
                if let Value::Object(map) = &mut body {
                    map.insert("message".into(), SUCCESS_MESSAGE.into());
                    map.insert("steps".into(), serde_json::to_value(steps).unwrap_or_default());
                }
                body
            }
            Err(err) => failure_payload(err),
        }
    }
}

/// Shape a pipeline error as `{success: false, error, details?}`.
pub fn failure_payload(err: &IntentError) -> Value {
    match err {
        IntentError::Compile(e) => json!({
            "success": false,
            "error": e.to_string(),
            "details": COMPILE_DETAILS,
        }),
        IntentError::ValidationFailed { violations } => json!({
            "success": false,
            "error": "validation failed",
            "details": violations,
        }),
        IntentError::Execute(e @ ExecuteError::NonzeroExit { stdout, stderr, .. }) => json!({
            "success": false,
            "error": e.detail(),
            "stdout": stdout,
            "stderr": stderr,
        }),
        other => json!({
            "success": false,
            "error": other.to_string(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct Pipeline {
    mode: CompilerMode,
    policy: ValidationPolicy,
    classifier: CommandClassifier,
    rules: RuleCompiler,
    compiler: Option<WorkflowCompiler>,
    dispatcher: Option<Arc<AiDispatcher>>,
    executor: WorkflowExecutor,
}

impl Pipeline {
    /// Build every stage from `config`.  Without a provider only the
    /// rule-based compiler is available and AI steps get a fixed apology.
    pub fn new(config: &PipelineConfig, provider: Option<Arc<dyn CompletionProvider>>) -> Result<Self> {
        let compiler = provider
            .clone()
            .map(|p| WorkflowCompiler::new(p, config.model.clone(), config.compile_timeout()));
        let dispatcher = provider.map(|p| Arc::new(AiDispatcher::new(p, config.model.clone())));

        let mut executor = WorkflowExecutor::from_config(config)?;
        if let Some(dispatcher) = &dispatcher {
            executor = executor.with_augmenter(Arc::clone(dispatcher));
        }

        Ok(Self {
            mode: config.compiler_mode,
            policy: config.validation_policy,
            classifier: CommandClassifier::new()?,
            rules: RuleCompiler::new()?,
            compiler,
            dispatcher,
            executor,
        })
    }

    pub fn classify(&self, command: &str) -> Classification {
        self.classifier.classify(command)
    }

    /// Whether a conversational message should go through the pipeline at
    /// all.  In gated mode only workflow candidates do; `always_llm` sends
    /// everything.
    pub fn wants_workflow(&self, command: &str) -> bool {
        match self.mode {
            CompilerMode::Gated => self.classify(command).is_workflow_candidate,
            CompilerMode::AlwaysLlm => true,
        }
    }

    /// Dispatcher for conversational fallbacks, when a provider is configured.
    pub fn dispatcher(&self) -> Option<&Arc<AiDispatcher>> {
        self.dispatcher.as_ref()
    }

    /// Compile and validate without executing.
    pub async fn compile(&self, command: &str) -> Result<CompiledWorkflow> {
        let command = command.trim();
        let classification = self.classify(command);

        let shortcut = match self.mode {
            CompilerMode::Gated if !classification.is_complex => self.rules.compile(command),
            _ => None,
        };

        let (graph, route) = match shortcut {
            Some(graph) => (graph, CompileRoute::Rules),
            None => {
                let compiler = self.compiler.as_ref().ok_or_else(|| {
                    CompileError::ProviderError("completion provider not configured".into())
                })?;
                (compiler.compile(command).await?, CompileRoute::Llm)
            }
        };

        let validation = validator::check(&graph);
        if !validation.is_valid() {
            match self.policy {
                ValidationPolicy::Block => {
                    return Err(IntentError::ValidationFailed {
                        violations: validation.messages(),
                    });
                }
                ValidationPolicy::Advisory => {
                    warn!(violations = validation.violations.len(), "executing workflow despite ordering violations");
                }
            }
        }

        info!(
            route = ?route,
            steps = graph.steps.len(),
            complex = classification.is_complex,
            "workflow compiled"
        );
        Ok(CompiledWorkflow {
            graph,
            classification,
            route,
            validation,
        })
    }

    /// Run one command end to end.  Never fails as a whole: every stage's
    /// error ends up in [`WorkflowRun::result`].
    pub async fn run(&self, command: &str) -> WorkflowRun {
        let workflow_id = WorkflowId::new();
        let command = command.trim().to_owned();
        info!(workflow_id = %workflow_id, command = %command, "workflow requested");

        let compiled = match self.compile(&command).await {
            Ok(compiled) => compiled,
            Err(err) => {
                warn!(workflow_id = %workflow_id, error = %err, "workflow not compiled");
                return WorkflowRun {
                    workflow_id,
                    command,
                    compiled: None,
                    result: Err(err),
                };
            }
        };

        let result = self
            .executor
            .execute(&compiled.graph, &workflow_id)
            .await
            .map_err(IntentError::from);

        WorkflowRun {
            workflow_id,
            command,
            compiled: Some(compiled),
            result,
        }
    }
}

//! Natural-language workflow engine for zero-knowledge proofs and USDC
//! transfers.
//!
//! A command flows through:
//!
//! 1. [`CommandClassifier`] -- cheap heuristics deciding workflow candidacy
//!    and complexity.
//! 2. [`RuleCompiler`] or [`WorkflowCompiler`] -- command text to a
//!    [`WorkflowGraph`] of typed steps.
//! 3. [`validator`] -- causal ordering of proof generation, verification and
//!    conditional transfers.
//! 4. [`WorkflowExecutor`] -- one external process per graph, driven through
//!    a transient artifact, with output scraped by the [`ResultExtractor`].
//! 5. [`AiDispatcher`] -- optional natural-language extras about the run.
//!
//! [`TransferStatusPoller`] and [`status::normalize`] handle transfer status
//! lookups on demand.  [`Pipeline`] wires the stages together.

pub mod augment;
pub mod classifier;
pub mod compiler;
pub mod config;
pub mod error;
pub mod executor;
pub mod extractor;
pub mod materializer;
pub mod pipeline;
pub mod rules;
pub mod status;
pub mod validator;
pub mod workflow;

pub use augment::AiDispatcher;
pub use classifier::{Classification, CommandClassifier};
pub use compiler::{CompileReport, WorkflowCompiler, parse_compiled};
pub use config::{CompilerMode, PipelineConfig, ValidationPolicy};
pub use error::{CompileError, ExecuteError, IntentError, Result};
pub use executor::{ExecutionResult, WorkflowExecutor};
pub use extractor::{Extraction, ProofRecord, ProofStatus, ResultExtractor};
pub use materializer::{Artifact, Materializer, UiStep, WorkflowId, ui_steps};
pub use pipeline::{CompileRoute, CompiledWorkflow, Pipeline, WorkflowRun, failure_payload};
pub use rules::RuleCompiler;
pub use status::{StatusReport, TransferStatus, TransferStatusPoller};
pub use validator::{ValidationReport, Violation, validate};
pub use workflow::{Ledger, ProofKey, StepKind, WorkflowGraph, WorkflowStep};

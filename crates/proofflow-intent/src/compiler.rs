//! Workflow compiler: command text to step graph via the completion provider.
//!
//! One provider call per command, JSON mode, bounded by a timeout.  The answer
//! goes through [`WorkflowGraph::from_raw`] so that every step is re-indexed,
//! lower-cased and defaulted before anything else sees it.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use proofflow_agent::{ChatRequest, CompletionProvider, Message};

use crate::error::CompileError;
use crate::workflow::{WorkflowGraph, WorkflowStep};

// ---------------------------------------------------------------------------
// Instruction contract
// ---------------------------------------------------------------------------

const SYSTEM_PROMPT: &str = r#"You convert natural-language commands about zero-knowledge proofs and USDC transfers into an ordered JSON workflow.

Step types:
1. generate_proof    - create a proof. proof_type: "kyc" | "location" | "ai_content". person: who the proof is about (optional).
2. verify_proof      - verify a proof locally. proof_type, person, proof_id (optional).
3. verify_on_ethereum - verify a proof on Ethereum. proof_type, person, proof_id (optional).
4. verify_on_solana  - verify a proof on Solana. proof_type, person, proof_id (optional).
5. verify_on_base    - verify a proof on Base. proof_type, person, proof_id (optional).
6. transfer          - send USDC. amount (string), recipient, blockchain ("ETH" | "SOL" | "BASE"), condition (e.g. "kyc_verified") or null.
7. list_proofs       - list existing proofs. list_type: "proofs" | "verifications".
8. process_with_ai   - answer an explicit extra request in natural language. request, context.

Rules:
- Every person in a conditional transfer gets their own generate_proof and verify_proof steps, placed before that person's transfer.
- A conditional transfer carries condition "<proof_type>_verified"; the recipient is the person the proof is about.
- Transfers default to blockchain "ETH" unless another chain is named.
- Add verify_on_<chain> steps only when on-chain verification is explicitly requested.
- Add process_with_ai only when the user explicitly asks for an explanation, translation, joke, analysis or similar.
- Keep the order the user gave.

Respond ONLY with a JSON object:
{
  "description": "the original command",
  "requiresProofs": true,
  "steps": [
    {"index": 0, "type": "generate_proof", "proof_type": "kyc", "person": "alice", "description": "Generate KYC proof for Alice"},
    {"index": 1, "type": "verify_proof", "proof_type": "kyc", "person": "alice", "description": "Verify Alice's KYC proof"},
    {"index": 2, "type": "transfer", "amount": "0.05", "recipient": "alice", "blockchain": "SOL", "condition": "kyc_verified", "description": "Send 0.05 USDC to Alice on Solana"}
  ]
}"#;

const EXAMPLES: &str = r#"Examples:
"Generate KYC proof" -> [{"type": "generate_proof", "proof_type": "kyc"}]
"Verify proof proof_kyc_123" -> [{"type": "verify_proof", "proof_id": "proof_kyc_123"}]
"Generate location proof for NYC then verify it on Ethereum" -> [{"type": "generate_proof", "proof_type": "location", "parameters": {"city": "New York"}}, {"type": "verify_on_ethereum", "proof_type": "location"}]
"If Bob is KYC compliant send him 1 USDC and explain what happened in Spanish" -> [{"type": "generate_proof", "proof_type": "kyc", "person": "bob"}, {"type": "verify_proof", "proof_type": "kyc", "person": "bob"}, {"type": "transfer", "amount": "1", "recipient": "bob", "blockchain": "ETH", "condition": "kyc_verified"}, {"type": "process_with_ai", "request": "explain what happened in Spanish", "context": "zero-knowledge proofs"}]"#;

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Compile outcome in the structured shape reported to callers: a failed
/// compile carries `error` and an empty step list instead of raising.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileReport {
    pub description: String,
    pub steps: Vec<WorkflowStep>,
    pub requires_proofs: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CompileReport {
    pub fn from_result(command: &str, result: &Result<WorkflowGraph, CompileError>) -> Self {
        match result {
            Ok(graph) => Self {
                description: graph.description.clone(),
                steps: graph.steps.clone(),
                requires_proofs: graph.requires_proofs,
                error: None,
            },
            Err(err) => Self {
                description: command.to_owned(),
                steps: Vec::new(),
                requires_proofs: false,
                error: Some(err.to_string()),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Compiler
// ---------------------------------------------------------------------------

/// Turns commands into step graphs using a completion provider.
pub struct WorkflowCompiler {
    provider: Arc<dyn CompletionProvider>,
    model: String,
    timeout: Duration,
}

impl WorkflowCompiler {
    pub fn new(provider: Arc<dyn CompletionProvider>, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            provider,
            model: model.into(),
            timeout,
        }
    }

    /// Compile a command.  The provider call is cancelled when the budget
    /// runs out.
    pub async fn compile(&self, command: &str) -> Result<WorkflowGraph, CompileError> {
        let request = ChatRequest::new(vec![
            Message::system(SYSTEM_PROMPT),
            Message::user(format!("{EXAMPLES}\n\nCommand: \"{command}\"")),
        ])
        .with_model(self.model.clone())
        .with_temperature(0.1)
        .with_max_tokens(1500)
        .json();

        debug!(command = %command, timeout_ms = self.timeout.as_millis() as u64, "compiling workflow");

        let answer = match tokio::time::timeout(self.timeout, self.provider.complete(&request)).await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                warn!(error = %e, "completion provider failed during compile");
                return Err(CompileError::ProviderError(e.to_string()));
            }
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "workflow compile timed out");
                return Err(CompileError::Timeout);
            }
        };

        let graph = parse_compiled(command, &answer)?;
        info!(steps = graph.steps.len(), requires_proofs = graph.requires_proofs, "workflow compiled");
        Ok(graph)
    }
}

/// Parse the provider's answer into a normalized graph.
///
/// Tolerates a surrounding markdown code fence and a bare step array.
pub fn parse_compiled(command: &str, answer: &str) -> Result<WorkflowGraph, CompileError> {
    let trimmed = strip_code_fence(answer);

    let value: Value = serde_json::from_str(trimmed)
        .map_err(|e| CompileError::ProviderError(format!("malformed JSON from provider: {e}")))?;

    let raw_steps = match &value {
        Value::Object(obj) => obj
            .get("steps")
            .and_then(Value::as_array)
            .ok_or_else(|| CompileError::ProviderError("answer has no `steps` array".into()))?,
        Value::Array(steps) => steps,
        _ => {
            return Err(CompileError::ProviderError(
                "answer is neither an object nor an array".into(),
            ));
        }
    };

    // The description is always the command itself, whatever the model echoed.
    let graph = WorkflowGraph::from_raw(command, raw_steps);
    if graph.is_empty() {
        return Err(CompileError::EmptyResult);
    }
    Ok(graph)
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed)
}

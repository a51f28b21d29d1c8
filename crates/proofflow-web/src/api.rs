//! Route handlers.
//!
//! Every handler answers with a JSON object carrying a `success` or `intent`
//! discriminator, including for malformed request bodies.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use proofflow_intent::augment::CHAT_UNAVAILABLE;
use proofflow_intent::{CompileReport, IntentError, Ledger, StatusReport, WorkflowRun};
use proofflow_store::{NewHistoryEntry, RunStatus};

use crate::state::AppState;

/// Number of entries returned by `/workflow_history`.
pub const HISTORY_LIMIT: usize = 20;

/// Messages answered with `intent: "blocked"` without touching any
/// collaborator; UIs that echo greetings back would otherwise loop.
const BLOCKED_MESSAGES: [&str; 5] = ["", "hello", "hello!", "hi", "hi!"];

const WORKFLOW_ACK: &str = "I'll process that for you.";

type Reply = (StatusCode, Json<Value>);

fn bad_request(error: impl Into<String>) -> Reply {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"success": false, "error": error.into()})),
    )
}

// ---------------------------------------------------------------------------
// POST /chat
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ChatPayload {
    #[serde(default)]
    pub message: String,
}

pub fn is_blocked(message: &str) -> bool {
    let lowered = message.trim().to_lowercase();
    BLOCKED_MESSAGES.contains(&lowered.as_str())
}

pub async fn chat(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ChatPayload>, JsonRejection>,
) -> Reply {
    let Json(payload) = match payload {
        Ok(p) => p,
        Err(e) => return bad_request(e.body_text()),
    };
    let message = payload.message.trim();

    if is_blocked(message) {
        info!(message = %message, "chat message blocked");
        return (StatusCode::OK, Json(json!({"intent": "blocked", "response": ""})));
    }

    if !state.pipeline.wants_workflow(message) {
        debug!(message = %message, "not a workflow candidate, answering conversationally");
        return chat_reply(&state, message).await;
    }

    let run = run_and_record(&state, message).await;
    if run.succeeded() {
        let report = run.report();
        let response = report
            .get("ai_response")
            .and_then(Value::as_str)
            .unwrap_or(WORKFLOW_ACK)
            .to_owned();
        return (
            StatusCode::OK,
            Json(json!({
                "intent": "workflow_executed",
                "command": message,
                "response": response,
                "workflow_result": report,
            })),
        );
    }

    chat_reply(&state, message).await
}

async fn chat_reply(state: &AppState, message: &str) -> Reply {
    let response = match state.pipeline.dispatcher() {
        Some(dispatcher) => dispatcher.reply(message).await,
        None => CHAT_UNAVAILABLE.to_owned(),
    };
    (
        StatusCode::OK,
        Json(json!({"intent": "openai_chat", "response": response})),
    )
}

// ---------------------------------------------------------------------------
// POST /execute_workflow, POST /test_parser
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct WorkflowPayload {
    #[serde(default)]
    pub command: String,
}

pub async fn execute_workflow(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<WorkflowPayload>, JsonRejection>,
) -> Reply {
    let Json(payload) = match payload {
        Ok(p) => p,
        Err(e) => return bad_request(e.body_text()),
    };
    let command = payload.command.trim();
    if command.is_empty() {
        return bad_request("Command required");
    }

    let run = run_and_record(&state, command).await;
    (StatusCode::OK, Json(run.report()))
}

/// Compile without executing; shows what a command would run.
pub async fn test_parser(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<WorkflowPayload>, JsonRejection>,
) -> Reply {
    let Json(payload) = match payload {
        Ok(p) => p,
        Err(e) => return bad_request(e.body_text()),
    };
    let command = payload.command.trim().to_owned();
    if command.is_empty() {
        return bad_request("Command required");
    }

    let classification = state.pipeline.classify(&command);
    let body = match state.pipeline.compile(&command).await {
        Ok(compiled) => json!({
            "success": true,
            "command": command,
            "classification": classification,
            "route": compiled.route,
            "parsed_result": CompileReport::from_result(&command, &Ok(compiled.graph)),
        }),
        Err(IntentError::Compile(e)) => json!({
            "success": false,
            "command": command,
            "classification": classification,
            "error": e.to_string(),
            "parsed_result": CompileReport::from_result(&command, &Err(e)),
        }),
        Err(other) => json!({
            "success": false,
            "command": command,
            "classification": classification,
            "error": other.to_string(),
        }),
    };
    (StatusCode::OK, Json(body))
}

async fn run_and_record(state: &AppState, command: &str) -> WorkflowRun {
    let run = state.pipeline.run(command).await;
    if let Some(history) = &state.history {
        if let Err(e) = history.record(history_entry(&run)).await {
            warn!(workflow_id = %run.workflow_id, error = %e, "failed to record workflow history");
        }
    }
    run
}

/// History record for a finished run, successful or not.
pub fn history_entry(run: &WorkflowRun) -> NewHistoryEntry {
    let steps = run
        .graph()
        .and_then(|g| serde_json::to_value(&g.steps).ok())
        .unwrap_or_else(|| json!([]));
    let (status, transfer_ids, proof_summary, error) = match &run.result {
        Ok(result) => (
            RunStatus::Completed,
            result.transfer_ids.iter().cloned().collect(),
            serde_json::to_value(&result.proof_summary).unwrap_or_else(|_| json!({})),
            None,
        ),
        Err(e) => (RunStatus::Failed, Vec::new(), json!({}), Some(e.to_string())),
    };
    NewHistoryEntry {
        id: run.workflow_id.to_string(),
        description: run.command.clone(),
        steps,
        status,
        transfer_ids,
        proof_summary,
        error,
    }
}

// ---------------------------------------------------------------------------
// POST /check_transfer_status, POST /poll_transfer
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferPayload {
    #[serde(default)]
    pub transfer_id: Option<String>,
    #[serde(default)]
    pub blockchain: Option<String>,
}

impl TransferPayload {
    fn transfer_id(&self) -> Option<&str> {
        self.transfer_id.as_deref().map(str::trim).filter(|id| !id.is_empty())
    }

    fn ledger(&self) -> Result<Ledger, String> {
        match self.blockchain.as_deref().map(str::trim).filter(|b| !b.is_empty()) {
            Some(tag) => tag.parse().map_err(|e| format!("{e}")),
            None => Ok(Ledger::Ethereum),
        }
    }
}

/// Status lookup including the raw script output.
pub async fn check_transfer_status(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<TransferPayload>, JsonRejection>,
) -> Reply {
    lookup(&state, payload, true).await
}

/// Normalized status only, for clients that poll repeatedly.
pub async fn poll_transfer(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<TransferPayload>, JsonRejection>,
) -> Reply {
    lookup(&state, payload, false).await
}

async fn lookup(
    state: &AppState,
    payload: Result<Json<TransferPayload>, JsonRejection>,
    include_raw: bool,
) -> Reply {
    let Json(payload) = match payload {
        Ok(p) => p,
        Err(e) => return bad_request(e.body_text()),
    };
    let Some(transfer_id) = payload.transfer_id() else {
        return bad_request("Transfer ID required");
    };
    let ledger = match payload.ledger() {
        Ok(ledger) => ledger,
        Err(e) => return bad_request(e),
    };

    match state.poller.poll(transfer_id, ledger).await {
        Ok(report) if report.lookup_succeeded() => {
            (StatusCode::OK, Json(status_body(transfer_id, &report, include_raw)))
        }
        Ok(report) => {
            let error = if report.stderr.trim().is_empty() {
                "Failed to check transfer status".to_owned()
            } else {
                report.stderr.trim().to_owned()
            };
            (
                StatusCode::OK,
                Json(json!({"success": false, "status": "pending", "error": error})),
            )
        }
        Err(e) => (
            StatusCode::OK,
            Json(json!({"success": false, "status": "pending", "error": e.to_string()})),
        ),
    }
}

fn status_body(transfer_id: &str, report: &StatusReport, include_raw: bool) -> Value {
    let mut body = json!({
        "success": true,
        "transferId": transfer_id,
        "status": report.status.status,
        "transactionHash": report.status.transaction_hash,
        "explorerLink": report.status.explorer_link,
        "blockchain": report.status.blockchain,
    });
    if include_raw && let Value::Object(map) = &mut body {
        map.insert("rawOutput".into(), report.raw_output.clone().into());
    }
    body
}

// ---------------------------------------------------------------------------
// GET /workflow_history
// ---------------------------------------------------------------------------

pub async fn workflow_history(State(state): State<Arc<AppState>>) -> Reply {
    let Some(history) = &state.history else {
        return (StatusCode::OK, Json(json!({"success": true, "workflows": []})));
    };
    match history.recent(HISTORY_LIMIT).await {
        Ok(workflows) => (
            StatusCode::OK,
            Json(json!({"success": true, "workflows": workflows})),
        ),
        Err(e) => {
            warn!(error = %e, "failed to read workflow history");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"success": false, "error": e.to_string()})),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greetings_and_empty_are_blocked() {
        for m in ["", "  ", "hello", "Hello!", "HI", "hi!"] {
            assert!(is_blocked(m), "{m:?} should be blocked");
        }
        for m in ["hello there", "hi, generate a kyc proof", "hey"] {
            assert!(!is_blocked(m), "{m:?} should pass");
        }
    }

    #[test]
    fn transfer_payload_defaults_to_ethereum() {
        let p: TransferPayload = serde_json::from_value(json!({"transferId": " t-1 "})).unwrap();
        assert_eq!(p.transfer_id(), Some("t-1"));
        assert_eq!(p.ledger().unwrap(), Ledger::Ethereum);

        let p: TransferPayload =
            serde_json::from_value(json!({"transferId": "t", "blockchain": "SOL"})).unwrap();
        assert_eq!(p.ledger().unwrap(), Ledger::Solana);

        let p: TransferPayload =
            serde_json::from_value(json!({"transferId": "t", "blockchain": "DOGE"})).unwrap();
        assert!(p.ledger().is_err());

        let p: TransferPayload = serde_json::from_value(json!({"transferId": ""})).unwrap();
        assert_eq!(p.transfer_id(), None);
    }
}

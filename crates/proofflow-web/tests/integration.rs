//! HTTP-level tests: a real listener on an ephemeral port, shell scripts in
//! place of the executor and status lookup, and a scripted provider.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use proofflow_adapters::CommandLine;
use proofflow_agent::{ChatRequest, CompletionProvider, ResponseFormat};
use proofflow_intent::{Pipeline, PipelineConfig, TransferStatusPoller};
use proofflow_store::{Database, HistoryStore};
use proofflow_web::AppState;
use serde_json::{Value, json};

#[derive(Default)]
struct ScriptedProvider {
    compile_answer: String,
    compile_calls: AtomicUsize,
    chat_calls: AtomicUsize,
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    async fn complete(&self, request: &ChatRequest) -> proofflow_agent::Result<String> {
        match request.response_format {
            ResponseFormat::JsonObject => {
                self.compile_calls.fetch_add(1, Ordering::SeqCst);
                Ok(self.compile_answer.clone())
            }
            ResponseFormat::Text => {
                self.chat_calls.fetch_add(1, Ordering::SeqCst);
                Ok("Happy to help with proofs and transfers.".into())
            }
        }
    }
}

const EXECUTOR: &str = r#"echo "Running workflow"
echo "   kyc: ✅ generated (proof_kyc_7)"
"#;

const EXECUTOR_MARKER: &str = "executor-ran";

const STATUS_SCRIPT: &str = r#"if [ "$1" = "broken" ]; then echo "lookup failed" >&2; exit 2; fi
echo "Checking transfer $1 on $2..."
echo '{"id": "'"$1"'", "status": "complete", "transactionId": "5YkD9x", "destination": {"chain": "SOL"}}'
"#;

struct TestServer {
    dir: std::path::PathBuf,
    base: String,
    client: reqwest::Client,
    _dir: tempfile::TempDir,
}

impl TestServer {
    async fn post(&self, path: &str, body: Value) -> (u16, Value) {
        let resp = self
            .client
            .post(format!("{}{path}", self.base))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    async fn get(&self, path: &str) -> Value {
        self.client
            .get(format!("{}{path}", self.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }
}

async fn spawn(provider: Option<Arc<dyn CompletionProvider>>) -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let config = PipelineConfig {
        executor: CommandLine::new([
            "sh",
            "-c",
            format!("touch {EXECUTOR_MARKER}\n{EXECUTOR}").as_str(),
            "sh",
        ])
        .unwrap(),
        executor_working_dir: Some(dir.path().to_path_buf()),
        artifact_dir: dir.path().join("artifacts"),
        execute_timeout_secs: 10,
        status_command: CommandLine::new(["sh", "-c", STATUS_SCRIPT, "sh"]).unwrap(),
        status_timeout_secs: 5,
        ..PipelineConfig::default()
    };
    let db = Database::open_and_migrate(dir.path().join("history.db")).await.unwrap();
    let state = Arc::new(AppState {
        pipeline: Arc::new(Pipeline::new(&config, provider).unwrap()),
        poller: Arc::new(TransferStatusPoller::from_config(&config)),
        history: Some(HistoryStore::new(db)),
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, proofflow_web::server::router(state)).await.unwrap();
    });

    TestServer {
        dir: dir.path().to_path_buf(),
        base: format!("http://{addr}"),
        client: reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .unwrap(),
        _dir: dir,
    }
}

fn scripted(compile_answer: Value) -> Arc<ScriptedProvider> {
    Arc::new(ScriptedProvider {
        compile_answer: compile_answer.to_string(),
        ..ScriptedProvider::default()
    })
}

fn shared(provider: &Arc<ScriptedProvider>) -> Option<Arc<dyn CompletionProvider>> {
    Some(provider.clone())
}

#[tokio::test]
async fn greetings_are_blocked() {
    let server = spawn(None).await;
    for message in ["hello", "Hi!", ""] {
        let (status, body) = server.post("/chat", json!({"message": message})).await;
        assert_eq!(status, 200);
        assert_eq!(body["intent"], "blocked");
        assert_eq!(body["response"], "");
    }
    let history = server.get("/workflow_history").await;
    assert_eq!(history["workflows"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn chat_runs_workflows_and_records_history() {
    let server = spawn(None).await;
    let (status, body) = server.post("/chat", json!({"message": "Generate KYC proof"})).await;
    assert_eq!(status, 200);
    assert_eq!(body["intent"], "workflow_executed", "{body}");
    assert_eq!(body["command"], "Generate KYC proof");
    assert_eq!(body["response"], "I'll process that for you.");
    assert_eq!(body["workflow_result"]["proofSummary"]["kyc"]["proofId"], "proof_kyc_7");

    let history = server.get("/workflow_history").await;
    assert_eq!(history["success"], true);
    let workflows = history["workflows"].as_array().unwrap();
    assert_eq!(workflows.len(), 1);
    assert_eq!(workflows[0]["description"], "Generate KYC proof");
    assert_eq!(workflows[0]["status"], "completed");
    assert_eq!(workflows[0]["stepCount"], 1);
}

#[tokio::test]
async fn chat_falls_back_to_conversation_when_compile_fails() {
    let provider = scripted(json!({"steps": []}));
    let server = spawn(shared(&provider)).await;
    let (_, body) = server
        .post("/chat", json!({"message": "Generate quantum proof then dance"}))
        .await;
    assert_eq!(body["intent"], "openai_chat");
    assert_eq!(body["response"], "Happy to help with proofs and transfers.");
    assert_eq!(provider.compile_calls.load(Ordering::SeqCst), 1);

    let history = server.get("/workflow_history").await;
    assert_eq!(history["workflows"][0]["status"], "failed");
}

#[tokio::test]
async fn plain_questions_skip_the_pipeline() {
    let provider = scripted(json!({"steps": [{"type": "list_proofs"}]}));
    let server = spawn(shared(&provider)).await;
    let (_, body) = server
        .post("/chat", json!({"message": "What is a zero-knowledge proof?"}))
        .await;
    assert_eq!(body["intent"], "openai_chat");
    assert_eq!(provider.compile_calls.load(Ordering::SeqCst), 0);
    assert_eq!(provider.chat_calls.load(Ordering::SeqCst), 1);
    assert!(!server.dir.join(EXECUTOR_MARKER).exists());

    let history = server.get("/workflow_history").await;
    assert_eq!(history["workflows"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn chat_without_provider_apologizes() {
    let server = spawn(None).await;
    let (_, body) = server.post("/chat", json!({"message": "tell me about the weather"})).await;
    assert_eq!(body["intent"], "openai_chat");
    assert_eq!(body["response"], proofflow_intent::augment::CHAT_UNAVAILABLE);
}

#[tokio::test]
async fn execute_workflow_requires_a_command() {
    let server = spawn(None).await;
    let (status, body) = server.post("/execute_workflow", json!({"command": "  "})).await;
    assert_eq!(status, 400);
    assert_eq!(body, json!({"success": false, "error": "Command required"}));
}

#[tokio::test]
async fn execute_workflow_reports_steps() {
    let server = spawn(None).await;
    let (status, body) = server
        .post("/execute_workflow", json!({"command": "Generate KYC proof"}))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["success"], true, "{body}");
    assert_eq!(body["message"], "Workflow executed successfully");
    assert_eq!(body["steps"][0]["id"], "step_1");
    assert!(body["workflowId"].as_str().unwrap().starts_with("wf_"));
}

#[tokio::test]
async fn test_parser_compiles_without_executing() {
    let server = spawn(None).await;
    let (_, body) = server.post("/test_parser", json!({"command": "Generate KYC proof"})).await;
    assert_eq!(body["success"], true, "{body}");
    assert_eq!(body["route"], "rules");
    assert_eq!(body["parsed_result"]["steps"].as_array().unwrap().len(), 1);

    let history = server.get("/workflow_history").await;
    assert_eq!(history["workflows"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn poll_transfer_normalizes_solana_status() {
    let server = spawn(None).await;
    let (status, body) = server
        .post("/poll_transfer", json!({"transferId": "t-9", "blockchain": "SOL"}))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["success"], true, "{body}");
    assert_eq!(body["status"], "complete");
    assert_eq!(body["transactionHash"], "5YkD9x");
    assert_eq!(body["blockchain"], "SOL");
    assert!(body["explorerLink"].as_str().unwrap().contains("5YkD9x"));
    assert!(body.get("rawOutput").is_none());
}

#[tokio::test]
async fn check_transfer_status_includes_raw_output() {
    let server = spawn(None).await;
    let (_, body) = server
        .post("/check_transfer_status", json!({"transferId": "t-9"}))
        .await;
    assert_eq!(body["success"], true, "{body}");
    assert_eq!(body["transferId"], "t-9");
    assert!(body["rawOutput"].as_str().unwrap().contains("Checking transfer t-9 on ETH"));
}

#[tokio::test]
async fn transfer_lookups_report_errors() {
    let server = spawn(None).await;

    let (status, body) = server.post("/check_transfer_status", json!({})).await;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "Transfer ID required");

    let (_, body) = server
        .post("/check_transfer_status", json!({"transferId": "broken"}))
        .await;
    assert_eq!(body["success"], false);
    assert_eq!(body["status"], "pending");
    assert_eq!(body["error"], "lookup failed");
}

#[tokio::test]
async fn malformed_json_gets_a_json_error() {
    let server = spawn(None).await;
    let resp = server
        .client
        .post(format!("{}/execute_workflow", server.base))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
}

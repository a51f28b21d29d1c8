//! Integration tests for the proofflow-agent crate.
//!
//! A stub OpenAI-compatible endpoint is served by axum on an ephemeral port
//! so the real HTTP path of [`LlmClient`] is exercised without network access.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::net::TcpListener;

use proofflow_agent::{
    AgentError, ChatRequest, CompletionProvider, LlmClient, LlmClientConfig, Message,
};

// ── helpers ──────────────────────────────────────────────────────────────────

type Captured = Arc<Mutex<Vec<Value>>>;

async fn completions(
    State(captured): State<Captured>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    captured.lock().unwrap().push(body);
    (
        StatusCode::OK,
        Json(json!({
            "choices": [{ "message": { "role": "assistant", "content": "{\"ok\":true}" } }],
            "usage": { "prompt_tokens": 4, "completion_tokens": 2 }
        })),
    )
}

async fn failing() -> (StatusCode, Json<Value>) {
    (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({ "error": "rate limited" })),
    )
}

/// Bind to 127.0.0.1:0, serve the stub router, return the base URL.
async fn start_stub(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind to port 0");
    let addr: SocketAddr = listener.local_addr().expect("get local addr");

    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    format!("http://127.0.0.1:{}", addr.port())
}

// ── tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn chat_sends_json_mode_and_parses_answer() {
    let captured: Captured = Arc::default();
    let router = Router::new()
        .route("/chat/completions", post(completions))
        .with_state(Arc::clone(&captured));
    let base = start_stub(router).await;

    let client =
        LlmClient::new(LlmClientConfig::openai_compatible("test-key", "gpt-4", base)).unwrap();
    let request = ChatRequest::new(vec![Message::system("contract"), Message::user("cmd")])
        .with_temperature(0.1)
        .json();

    let completion = client.chat(&request).await.unwrap();
    assert_eq!(completion.text, "{\"ok\":true}");
    assert_eq!(completion.usage.input_tokens, 4);

    let bodies = captured.lock().unwrap();
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["model"], "gpt-4");
    assert_eq!(bodies[0]["response_format"]["type"], "json_object");
    assert_eq!(bodies[0]["messages"][0]["role"], "system");
}

#[tokio::test]
async fn provider_trait_returns_text() {
    let captured: Captured = Arc::default();
    let router = Router::new()
        .route("/chat/completions", post(completions))
        .with_state(captured);
    let base = start_stub(router).await;

    let client = LlmClient::new(LlmClientConfig::openai_compatible("k", "m", base)).unwrap();
    let provider: Arc<dyn CompletionProvider> = Arc::new(client);

    let text = provider
        .complete(&ChatRequest::new(vec![Message::user("hi")]))
        .await
        .unwrap();
    assert_eq!(text, "{\"ok\":true}");
}

#[tokio::test]
async fn non_success_status_is_request_failure() {
    let base = start_stub(Router::new().route("/chat/completions", post(failing))).await;

    let client = LlmClient::new(LlmClientConfig::openai_compatible("k", "m", base)).unwrap();
    let err = client
        .chat(&ChatRequest::new(vec![Message::user("hi")]))
        .await
        .unwrap_err();

    match err {
        AgentError::LlmRequestFailed { reason } => assert!(reason.contains("429")),
        other => panic!("unexpected error: {other}"),
    }
}

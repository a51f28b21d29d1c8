//! HTTP surface for proofflow.
//!
//! Exposes the workflow pipeline over a small JSON API:
//!
//! - `POST /chat` - conversational entry point; runs a workflow when the
//!   message compiles to one, otherwise answers as a chat assistant.
//! - `POST /execute_workflow` - compile, validate and execute a command.
//! - `POST /test_parser` - compile only.
//! - `POST /check_transfer_status`, `POST /poll_transfer` - USDC transfer
//!   status lookups.
//! - `GET /workflow_history` - recently executed workflows.

pub mod api;
pub mod error;
pub mod server;
pub mod state;

pub use error::{Result, WebError};
pub use server::WebServer;
pub use state::AppState;

/// Web server configuration.
#[derive(Debug, Clone)]
pub struct WebConfig {
    /// The address to bind the HTTP server to.
    pub bind_addr: String,
    /// The port to listen on.
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1".into(),
            port: 3000,
        }
    }
}

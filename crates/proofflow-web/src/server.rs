//! Router composition and listener startup.

use std::sync::Arc;

use axum::Router;
use axum::http::Method;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};

use crate::WebConfig;
use crate::api;
use crate::error::{Result, WebError};
use crate::state::AppState;

pub struct WebServer {
    config: WebConfig,
    state: Arc<AppState>,
}

impl WebServer {
    pub fn new(config: WebConfig, state: Arc<AppState>) -> Self {
        Self { config, state }
    }

    /// Return the `host:port` string this server will bind to.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.config.bind_addr, self.config.port)
    }

    /// Build the router with every route registered.
    pub fn router(&self) -> Router {
        router(Arc::clone(&self.state))
    }

    /// Bind and serve until the process is stopped.
    ///
    /// # Errors
    ///
    /// Returns [`WebError::Bind`] if the listener cannot be bound.
    pub async fn start(self) -> Result<()> {
        let addr = self.addr();
        let router = self.router();

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|source| WebError::Bind {
                addr: addr.clone(),
                source,
            })?;
        tracing::info!(addr = %addr, "starting web server");

        axum::serve(listener, router).await?;
        Ok(())
    }
}

/// The application router over `state`; usable without a [`WebServer`].
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/chat", post(api::chat))
        .route("/execute_workflow", post(api::execute_workflow))
        .route("/test_parser", post(api::test_parser))
        .route("/check_transfer_status", post(api::check_transfer_status))
        .route("/poll_transfer", post(api::poll_transfer))
        .route("/workflow_history", get(api::workflow_history))
        .layer(cors)
        .with_state(state)
}

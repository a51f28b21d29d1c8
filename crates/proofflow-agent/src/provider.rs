//! The completion-provider seam.
//!
//! Core logic depends on [`CompletionProvider`] rather than on [`LlmClient`]
//! so that tests and alternative back ends can stand in for the HTTP client.

use async_trait::async_trait;

use crate::error::Result;
use crate::llm::{ChatRequest, LlmClient};

/// Anything that can answer a role-tagged chat request with text.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Run one completion and return the answer text.
    async fn complete(&self, request: &ChatRequest) -> Result<String>;
}

#[async_trait]
impl CompletionProvider for LlmClient {
    async fn complete(&self, request: &ChatRequest) -> Result<String> {
        Ok(self.chat(request).await?.text)
    }
}

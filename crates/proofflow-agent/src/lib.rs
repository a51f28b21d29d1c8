//! Completion-provider access for proofflow.
//!
//! The workflow compiler and the AI-augmentation dispatcher both talk to a
//! natural-language completion service.  This crate owns that boundary:
//!
//! - [`llm`] -- wire types and the HTTP client for the OpenAI Chat Completions
//!   API (and compatible endpoints) and the Anthropic Messages API.
//! - [`provider`] -- the [`CompletionProvider`] trait every caller depends on,
//!   so the rest of the system never sees a concrete HTTP client.
//! - [`error`] -- agent error types.

pub mod error;
pub mod llm;
pub mod provider;

pub use error::{AgentError, Result};
pub use llm::{
    ChatRequest, Completion, LlmClient, LlmClientConfig, LlmProvider, Message, ResponseFormat,
    Role, Usage,
};
pub use provider::CompletionProvider;

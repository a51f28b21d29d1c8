//! Agent error types.
//!
//! Every failure at the completion-provider boundary surfaces as an
//! [`AgentError`].  Callers treat all of them as "the provider did not give a
//! usable answer"; the variants exist for logging and tests.

/// Unified error type for the completion-provider client.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    // -- LLM errors ----------------------------------------------------------
    /// An HTTP request to the provider failed or returned a non-2xx status.
    #[error("llm request failed: {reason}")]
    LlmRequestFailed { reason: String },

    /// The provider response could not be parsed into the expected format.
    #[error("llm response parse error: {reason}")]
    LlmParseFailed { reason: String },

    /// The API key is missing for a provider that requires one.
    #[error("missing api key for provider: {provider}")]
    MissingApiKey { provider: String },

    // -- Serialization -------------------------------------------------------
    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias used throughout the agent crate.
pub type Result<T> = std::result::Result<T, AgentError>;

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        Self::LlmRequestFailed {
            reason: err.to_string(),
        }
    }
}

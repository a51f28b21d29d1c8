//! AI augmentation of executed workflows.
//!
//! A `process_with_ai` step asks for a natural-language extra (explanation,
//! translation, joke, ...) about what just ran.  The prompt pair is picked
//! from an ordered table by keyword; the first matching route wins and the
//! last one always matches.  Provider failures never propagate.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

use tracing::{debug, warn};

use proofflow_agent::{ChatRequest, CompletionProvider, Message};

use crate::extractor::ProofRecord;

/// Returned in place of an augmentation when the provider fails.
pub const AUGMENT_UNAVAILABLE: &str = "Unable to process AI request at this time.";

/// Returned in place of a conversational reply when the provider fails.
pub const CHAT_UNAVAILABLE: &str =
    "The language model is not reachable right now. Please try again later.";

const DEFAULT_CONTEXT: &str = "zero-knowledge proofs";
const AUGMENT_MAX_TOKENS: u32 = 300;
const CHAT_MAX_TOKENS: u32 = 150;

const CHAT_SYSTEM_PROMPT: &str = "You are a helpful assistant. Answer questions naturally and conversationally. Keep responses concise but informative.";

// ---------------------------------------------------------------------------
// Dispatch table
// ---------------------------------------------------------------------------

/// One entry of the dispatch table.
///
/// `user` is a template: `{facts}` is the summary of what ran, `{request}`
/// the raw request and `{Request}` the request with its first letter
/// capitalized.
#[derive(Debug, Clone, Copy)]
pub struct Route {
    pub name: &'static str,
    pub keywords: &'static [&'static str],
    pub system: &'static str,
    pub user: &'static str,
    pub temperature: f32,
}

impl Route {
    fn matches(&self, lowered: &str) -> bool {
        self.keywords.is_empty() || self.keywords.iter().any(|k| lowered.contains(k))
    }
}

/// Evaluated top to bottom.  The final entry has no keywords and catches
/// everything.
pub const ROUTES: &[Route] = &[
    Route {
        name: "explain",
        keywords: &["explain"],
        system: "You are an expert in zero-knowledge proofs. Explain concepts clearly.",
        user: "{facts}\n\nPlease {request} in the context of what was just executed.",
        temperature: 0.7,
    },
    Route {
        name: "humor",
        keywords: &["joke", "funny"],
        system: "You are a witty comedian who understands cryptography and zero-knowledge proofs.",
        user: "{facts}\n\n{Request} about what just happened with the zero-knowledge proof.",
        temperature: 0.8,
    },
    Route {
        name: "spanish",
        keywords: &["spanish"],
        system: "You are a translator. Respond only in Spanish.",
        user: "{facts}\n\nTranslate this information to Spanish and provide a brief summary.",
        temperature: 0.7,
    },
    Route {
        name: "french",
        keywords: &["french"],
        system: "You are a translator. Respond only in French.",
        user: "{facts}\n\nTranslate this information to French and provide a brief summary.",
        temperature: 0.7,
    },
    Route {
        name: "chinese",
        keywords: &["chinese"],
        system: "You are a translator. Respond only in Chinese.",
        user: "{facts}\n\nTranslate this information to Chinese and provide a brief summary.",
        temperature: 0.7,
    },
    Route {
        name: "analysis",
        keywords: &["analyze"],
        system: "You are a security analyst specializing in cryptographic protocols.",
        user: "{facts}\n\nProvide a technical analysis of the security implications of this operation.",
        temperature: 0.7,
    },
    Route {
        name: "simple",
        keywords: &["simple", "eli5"],
        system: "You are great at explaining complex topics to a 5-year-old.",
        user: "{facts}\n\nExplain what just happened in very simple terms that a child could understand.",
        temperature: 0.7,
    },
    Route {
        name: "generic",
        keywords: &[],
        system: "You are a helpful assistant with expertise in zero-knowledge proofs and cryptography.",
        user: "{facts}\n\n{request}",
        temperature: 0.7,
    },
];

/// First route whose keywords occur in `request` (case-insensitive).
pub fn route_for(request: &str) -> &'static Route {
    let lowered = request.to_lowercase();
    ROUTES
        .iter()
        .find(|route| route.matches(&lowered))
        .unwrap_or(&ROUTES[ROUTES.len() - 1])
}

/// Plain-text summary of the run handed to the provider as context.
pub fn describe_run(command: &str, proof_summary: &BTreeMap<String, ProofRecord>) -> String {
    let mut facts = format!("The user requested: '{command}'\n");
    if !proof_summary.is_empty() {
        facts.push_str("Operations completed:\n");
        for (kind, record) in proof_summary {
            let _ = writeln!(
                facts,
                "- {kind} proof: {} (ID: {})",
                record.status.as_str(),
                record.proof_id.as_deref().unwrap_or("n/a")
            );
        }
    }
    facts
}

fn capitalize_first(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Produces advisory natural-language output around workflow runs.
pub struct AiDispatcher {
    provider: Arc<dyn CompletionProvider>,
    model: String,
}

impl AiDispatcher {
    pub fn new(provider: Arc<dyn CompletionProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }

    /// Answer an augmentation request about a finished run.  One provider
    /// call, no retry; failure yields [`AUGMENT_UNAVAILABLE`].
    pub async fn augment(
        &self,
        request: &str,
        context: &str,
        proof_summary: &BTreeMap<String, ProofRecord>,
        original_command: &str,
    ) -> String {
        let route = route_for(request);
        let facts = describe_run(original_command, proof_summary);
        let user = route
            .user
            .replace("{facts}", facts.trim_end())
            .replace("{Request}", &capitalize_first(request))
            .replace("{request}", request);

        let mut system = route.system.to_owned();
        let context = context.trim();
        if !context.is_empty() && context != DEFAULT_CONTEXT {
            let _ = write!(system, " The topic is {context}.");
        }

        debug!(route = route.name, proofs = proof_summary.len(), "dispatching ai augmentation");

        let chat = ChatRequest::new(vec![Message::system(system), Message::user(user)])
            .with_model(self.model.clone())
            .with_temperature(route.temperature)
            .with_max_tokens(AUGMENT_MAX_TOKENS);

        match self.provider.complete(&chat).await {
            Ok(text) => text.trim().to_owned(),
            Err(e) => {
                warn!(route = route.name, error = %e, "ai augmentation failed");
                AUGMENT_UNAVAILABLE.to_owned()
            }
        }
    }

    /// Short conversational answer for messages that are not workflows.
    pub async fn reply(&self, message: &str) -> String {
        let chat = ChatRequest::new(vec![
            Message::system(CHAT_SYSTEM_PROMPT),
            Message::user(message),
        ])
        .with_model(self.model.clone())
        .with_temperature(0.7)
        .with_max_tokens(CHAT_MAX_TOKENS);

        match self.provider.complete(&chat).await {
            Ok(text) => text.trim().to_owned(),
            Err(e) => {
                warn!(error = %e, "conversational reply failed");
                CHAT_UNAVAILABLE.to_owned()
            }
        }
    }
}

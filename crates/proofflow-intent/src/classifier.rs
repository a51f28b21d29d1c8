//! Command classifier.
//!
//! A cheap, local decision made before any completion-provider call:
//!
//! | Question | Technique |
//! |----------|-----------|
//! | Is this a workflow at all? | connective / conditional-transfer / proof-operation regexes |
//! | Does it need semantic parsing? | conditional-clause counting plus a few conditional-transfer templates |
//!
//! Classification is a pure function of the command text; it never fails.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{IntentError, Result};

// ---------------------------------------------------------------------------
// Patterns
// ---------------------------------------------------------------------------

/// Multi-step connective language.
const CONNECTIVES: &str = r"(?i)\b(then|after\s+that|followed\s+by|finally)\b|;";

const TRANSFER_VERB: &str = r"(?i)\b(send|transfer|pay)\b";

/// Conditional or temporal keyword, including the state words that make a
/// transfer conditional ("compliant", "verified").
const CONDITIONAL: &str = r"(?i)\b(if|when|after|once|unless|compliant|verified)\b";

const CURRENCY: &str = r"(?i)\b(usdc|usd|eth|sol)\b|\$\s*\d";

/// Single proof operations the engine understands directly.
const PROOF_OPERATIONS: &[&str] = &[
    r"(?i)^\s*(generate|create|prove)\s+(kyc|ai\s+content|location)\b",
    r"(?i)^\s*generate\s+.*\bproof\b",
    r"(?i)^\s*verify\s+(the\s+)?(proof|kyc|location|ai)\b",
    r"(?i)^\s*(list|show)\s+(all\s+|my\s+)?(proofs?|verifications?)\b",
    r"(?i)\b(send|transfer)\s+.*\busdc\b",
];

/// Clause-opening conditionals counted for the "more than one condition" rule.
const CONDITIONAL_CLAUSE: &str = r"(?i)\b(if|when)\b";

const CONJUNCTION: &str = r"(?i)\b(and|or|but)\b";

/// Natural-language conditional-transfer templates that always need the
/// completion provider.
const COMPLEX_TEMPLATES: &[&str] = &[
    r"(?i)\bif\s+\w+\s+(is|has|was)\s+.+\s+(then\s+)?(also\s+)?send\b",
    r"(?i)\bsend\s+.+\s+to\s+\w+\s+(only\s+)?if\b",
    r"(?i)\btransfer\s+.+\s+but\s+only\s+if\b",
    r"(?i)\bwhen\s+\w+\s+(is|becomes)\s+.+\s+send\b",
];

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Outcome of classifying one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    /// The command describes proof or transfer work at all.
    pub is_workflow_candidate: bool,
    /// The command needs the completion provider rather than the rule parser.
    pub is_complex: bool,
}

/// Compiled classifier patterns.  Build once and share.
#[derive(Debug, Clone)]
pub struct CommandClassifier {
    connectives: Regex,
    transfer_verb: Regex,
    conditional: Regex,
    currency: Regex,
    proof_operations: Vec<Regex>,
    conditional_clause: Regex,
    conjunction: Regex,
    complex_templates: Vec<Regex>,
}

impl CommandClassifier {
    /// Compile the built-in patterns.
    pub fn new() -> Result<Self> {
        Ok(Self {
            connectives: compile(CONNECTIVES)?,
            transfer_verb: compile(TRANSFER_VERB)?,
            conditional: compile(CONDITIONAL)?,
            currency: compile(CURRENCY)?,
            proof_operations: PROOF_OPERATIONS
                .iter()
                .map(|p| compile(p))
                .collect::<Result<_>>()?,
            conditional_clause: compile(CONDITIONAL_CLAUSE)?,
            conjunction: compile(CONJUNCTION)?,
            complex_templates: COMPLEX_TEMPLATES
                .iter()
                .map(|p| compile(p))
                .collect::<Result<_>>()?,
        })
    }

    /// Classify a command.
    pub fn classify(&self, command: &str) -> Classification {
        let classification = Classification {
            is_workflow_candidate: self.is_workflow_candidate(command),
            is_complex: self.is_complex(command),
        };
        tracing::debug!(
            command = %command,
            candidate = classification.is_workflow_candidate,
            complex = classification.is_complex,
            "command classified"
        );
        classification
    }

    fn is_workflow_candidate(&self, command: &str) -> bool {
        if self.connectives.is_match(command) {
            return true;
        }
        if self.transfer_verb.is_match(command)
            && self.conditional.is_match(command)
            && self.currency.is_match(command)
        {
            return true;
        }
        self.proof_operations.iter().any(|re| re.is_match(command))
    }

    fn is_complex(&self, command: &str) -> bool {
        let clauses = self.conditional_clause.find_iter(command).count();
        if clauses > 1 && self.conjunction.is_match(command) {
            return true;
        }
        if self.complex_templates.iter().any(|re| re.is_match(command)) {
            return true;
        }
        let transfers = self.transfer_verb.find_iter(command).count();
        transfers > 1 && clauses > 0
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| IntentError::InvalidPattern {
        pattern: pattern.to_owned(),
        reason: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

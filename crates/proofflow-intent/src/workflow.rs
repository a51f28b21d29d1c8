//! Step graph model.
//!
//! The completion provider answers with loosely-typed step records.  They are
//! turned into a closed set of [`StepKind`] variants once, right after
//! compilation, by [`WorkflowGraph::from_raw`]; everything downstream matches
//! on the variants instead of probing optional fields.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value, json};
use tracing::warn;

/// Person used in proof keys when a step names nobody.
pub const DEFAULT_PERSON: &str = "user";

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// A blockchain network on which verification or transfer can happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Ledger {
    Ethereum,
    Solana,
    Base,
}

impl Ledger {
    pub const ALL: [Ledger; 3] = [Ledger::Ethereum, Ledger::Solana, Ledger::Base];

    /// Short tag used on the wire (`ETH`, `SOL`, `BASE`).
    pub fn tag(self) -> &'static str {
        match self {
            Self::Ethereum => "ETH",
            Self::Solana => "SOL",
            Self::Base => "BASE",
        }
    }

    /// Lower-case network name as used in step types.
    pub fn name(self) -> &'static str {
        match self {
            Self::Ethereum => "ethereum",
            Self::Solana => "solana",
            Self::Base => "base",
        }
    }

    /// Step type of an on-chain verification on this ledger.
    pub fn verify_step_type(self) -> String {
        format!("verify_on_{}", self.name())
    }

    /// Block explorer URL for a transaction hash.
    pub fn explorer_link(self, tx_hash: &str) -> String {
        match self {
            Self::Ethereum => format!("https://sepolia.etherscan.io/tx/{tx_hash}"),
            Self::Solana => format!("https://explorer.solana.com/tx/{tx_hash}?cluster=devnet"),
            Self::Base => format!("https://sepolia.basescan.org/tx/{tx_hash}"),
        }
    }

    /// Whether a transfer can report "complete" before a hash is known.
    pub fn finalizes_async(self) -> bool {
        matches!(self, Self::Solana)
    }

    /// Chain mentioned in free text: anything containing "sol" is Solana,
    /// "base" is Base, everything else defaults to Ethereum.
    pub fn from_mention(text: &str) -> Self {
        let lowered = text.to_lowercase();
        if lowered.contains("sol") {
            Self::Solana
        } else if lowered.contains("base") {
            Self::Base
        } else {
            Self::Ethereum
        }
    }
}

impl fmt::Display for Ledger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Error for an unrecognized ledger tag.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown ledger `{0}`")]
pub struct UnknownLedger(pub String);

impl FromStr for Ledger {
    type Err = UnknownLedger;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "eth" | "ethereum" | "sepolia" => Ok(Self::Ethereum),
            "sol" | "solana" => Ok(Self::Solana),
            "base" | "base_sepolia" => Ok(Self::Base),
            other => Err(UnknownLedger(other.to_owned())),
        }
    }
}

impl Serialize for Ledger {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.tag())
    }
}

impl<'de> Deserialize<'de> for Ledger {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Proof keys
// ---------------------------------------------------------------------------

/// Identifies "the proof of kind X about person Y" across steps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProofKey {
    pub proof_type: String,
    pub person: String,
}

impl ProofKey {
    pub fn new(proof_type: impl Into<String>, person: Option<&str>) -> Self {
        Self {
            proof_type: proof_type.into(),
            person: person.unwrap_or(DEFAULT_PERSON).to_owned(),
        }
    }
}

impl fmt::Display for ProofKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.proof_type, self.person)
    }
}

// ---------------------------------------------------------------------------
// Transfer conditions
// ---------------------------------------------------------------------------

/// What a conditional transfer needs before it may run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub key: ProofKey,
    /// Set when the proof must have been verified on a specific ledger.
    pub ledger: Option<Ledger>,
}

/// Proof kind referenced by a condition such as `kyc_verified`,
/// `"Alice is KYC compliant"` or `location_verified_on_solana`.
pub fn condition_proof_type(condition: &str) -> Option<String> {
    let c = normalize_token(condition);
    if c.is_empty() || c == "none" || c == "null" {
        return None;
    }

    const KINDS: [(&str, &str); 4] = [
        ("kyc", "kyc"),
        ("complian", "kyc"),
        ("location", "location"),
        ("ai_content", "ai_content"),
    ];
    if let Some((_, kind)) = KINDS.iter().find(|(needle, _)| c.contains(needle)) {
        return Some((*kind).to_owned());
    }
    if c.split('_').any(|token| token == "ai") {
        return Some("ai_content".to_owned());
    }

    let mut stripped = c.as_str();
    for ledger in Ledger::ALL {
        stripped = stripped.trim_end_matches(&format!("_on_{}", ledger.name()));
    }
    let stripped = stripped.strip_suffix("_verified")?;
    let is_ident = !stripped.is_empty()
        && stripped
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_');
    is_ident.then(|| stripped.to_owned())
}

/// Ledger a condition requires on-chain verification on, e.g.
/// `kyc_verified_on_ethereum`.
pub fn condition_ledger(condition: &str) -> Option<Ledger> {
    let c = normalize_token(condition);
    Ledger::ALL.into_iter().find(|ledger| {
        c.contains(&format!("on_{}", ledger.name()))
            || c.contains(&format!("on_{}", ledger.tag().to_lowercase()))
    })
}

fn normalize_token(text: &str) -> String {
    text.trim()
        .to_lowercase()
        .split(|c: char| c.is_whitespace() || c == '-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// The closed set of step kinds and their payloads.
#[derive(Debug, Clone, PartialEq)]
pub enum StepKind {
    GenerateProof {
        proof_type: String,
        person: Option<String>,
        parameters: Map<String, Value>,
    },
    /// Local verification.
    VerifyProof {
        proof_type: Option<String>,
        person: Option<String>,
        proof_id: String,
    },
    VerifyOnLedger {
        ledger: Ledger,
        proof_type: Option<String>,
        person: Option<String>,
        proof_id: String,
    },
    Transfer {
        amount: String,
        recipient: String,
        ledger: Ledger,
        condition: Option<String>,
        required_proof_types: Vec<String>,
    },
    ListProofs {
        list_type: Option<String>,
    },
    ProcessWithAi {
        request: String,
        context: String,
    },
}

impl StepKind {
    /// Wire name of the step type.
    pub fn type_name(&self) -> String {
        match self {
            Self::GenerateProof { .. } => "generate_proof".into(),
            Self::VerifyProof { .. } => "verify_proof".into(),
            Self::VerifyOnLedger { ledger, .. } => ledger.verify_step_type(),
            Self::Transfer { .. } => "transfer".into(),
            Self::ListProofs { .. } => "list_proofs".into(),
            Self::ProcessWithAi { .. } => "process_with_ai".into(),
        }
    }

    /// Proof kind this step produces or checks, if any.
    pub fn proof_type(&self) -> Option<&str> {
        match self {
            Self::GenerateProof { proof_type, .. } => Some(proof_type),
            Self::VerifyProof { proof_type, .. } | Self::VerifyOnLedger { proof_type, .. } => {
                proof_type.as_deref()
            }
            _ => None,
        }
    }

    /// The proof key a generate or verify step refers to.
    ///
    /// Verification of an explicitly named proof without a kind refers to no
    /// key and is not subject to ordering checks.
    pub fn proof_key(&self) -> Option<ProofKey> {
        match self {
            Self::GenerateProof {
                proof_type, person, ..
            } => Some(ProofKey::new(proof_type.clone(), person.as_deref())),
            Self::VerifyProof {
                proof_type: Some(proof_type),
                person,
                ..
            }
            | Self::VerifyOnLedger {
                proof_type: Some(proof_type),
                person,
                ..
            } => Some(ProofKey::new(proof_type.clone(), person.as_deref())),
            _ => None,
        }
    }

    /// Proofs a transfer depends on, from its condition and its explicit
    /// `required_proof_types`.
    pub fn requirements(&self) -> Vec<Requirement> {
        let Self::Transfer {
            recipient,
            condition,
            required_proof_types,
            ..
        } = self
        else {
            return Vec::new();
        };

        let ledger = condition.as_deref().and_then(condition_ledger);
        let mut out: Vec<Requirement> = Vec::new();
        let types = condition
            .as_deref()
            .and_then(condition_proof_type)
            .into_iter()
            .chain(
                required_proof_types
                    .iter()
                    .filter_map(|t| condition_proof_type(t)),
            );
        for proof_type in types {
            let requirement = Requirement {
                key: ProofKey::new(proof_type, Some(recipient.as_str())),
                ledger,
            };
            if !out.contains(&requirement) {
                out.push(requirement);
            }
        }
        out
    }
}

/// One unit of work in a compiled workflow.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowStep {
    pub index: usize,
    pub description: String,
    pub kind: StepKind,
}

/// Why a raw step record was dropped during normalization.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("step rejected: {0}")]
pub struct StepRejected(pub String);

impl WorkflowStep {
    /// Rebuild a typed step from one loosely-typed record.
    ///
    /// Accepts both `snake_case` and `camelCase` field names, lower-cases
    /// people, and fills defaults so later stages never see absent fields.
    pub fn from_raw(index: usize, raw: &Value) -> Result<Self, StepRejected> {
        let obj = raw
            .as_object()
            .ok_or_else(|| StepRejected("step is not an object".into()))?;
        let step_type = text(obj, &["type", "action"])
            .map(|t| t.to_lowercase())
            .ok_or_else(|| StepRejected("missing step type".into()))?;

        let proof_type = text(obj, &["proof_type", "proofType"]).map(|t| t.to_lowercase());
        let person = text(obj, &["person"]).map(|p| p.to_lowercase());

        let kind = match step_type.as_str() {
            "generate_proof" => StepKind::GenerateProof {
                proof_type: proof_type
                    .ok_or_else(|| StepRejected("generate_proof without proof_type".into()))?,
                person,
                parameters: obj
                    .get("parameters")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default(),
            },
            "verify_proof" => {
                let proof_id = verification_proof_id(obj, proof_type.as_deref(), person.as_deref())?;
                StepKind::VerifyProof {
                    proof_type,
                    person,
                    proof_id,
                }
            }
            "transfer" => StepKind::Transfer {
                amount: amount(obj)
                    .ok_or_else(|| StepRejected("transfer without amount".into()))?,
                recipient: text(obj, &["recipient", "to"])
                    .map(|r| r.to_lowercase())
                    .ok_or_else(|| StepRejected("transfer without recipient".into()))?,
                ledger: text(obj, &["blockchain", "ledger", "chain"])
                    .map(Ledger::from_mention)
                    .unwrap_or(Ledger::Ethereum),
                condition: text(obj, &["condition"]).map(|c| c.to_lowercase()),
                required_proof_types: string_list(obj, &["required_proof_types", "requiredProofTypes"]),
            },
            "list_proofs" => StepKind::ListProofs {
                list_type: text(obj, &["list_type", "listType"]).map(str::to_owned),
            },
            "process_with_ai" => StepKind::ProcessWithAi {
                request: text(obj, &["request"]).unwrap_or("process").to_owned(),
                context: text(obj, &["context"])
                    .unwrap_or("zero-knowledge proofs")
                    .to_owned(),
            },
            other => match other.strip_prefix("verify_on_").map(str::parse::<Ledger>) {
                Some(Ok(ledger)) => {
                    let proof_id =
                        verification_proof_id(obj, proof_type.as_deref(), person.as_deref())?;
                    StepKind::VerifyOnLedger {
                        ledger,
                        proof_type,
                        person,
                        proof_id,
                    }
                }
                _ => return Err(StepRejected(format!("unknown step type `{other}`"))),
            },
        };

        let description = text(obj, &["description"])
            .map(str::to_owned)
            .unwrap_or_else(|| kind.type_name().replace('_', " "));

        Ok(Self {
            index,
            description,
            kind,
        })
    }

    /// Flat JSON record as consumed by the external executor.
    pub fn to_wire(&self) -> Value {
        let mut v = json!({
            "index": self.index,
            "type": self.kind.type_name(),
            "description": self.description,
        });
        match &self.kind {
            StepKind::GenerateProof {
                proof_type,
                person,
                parameters,
            } => {
                v["proof_type"] = json!(proof_type);
                v["person"] = json!(person);
                v["parameters"] = Value::Object(parameters.clone());
            }
            StepKind::VerifyProof {
                proof_type,
                person,
                proof_id,
            }
            | StepKind::VerifyOnLedger {
                proof_type,
                person,
                proof_id,
                ..
            } => {
                v["proof_type"] = json!(proof_type);
                v["person"] = json!(person);
                v["proof_id"] = json!(proof_id);
            }
            StepKind::Transfer {
                amount,
                recipient,
                ledger,
                condition,
                required_proof_types,
            } => {
                v["amount"] = json!(amount);
                v["recipient"] = json!(recipient);
                v["blockchain"] = json!(ledger.tag());
                v["condition"] = json!(condition);
                v["required_proof_types"] = json!(required_proof_types);
            }
            StepKind::ListProofs { list_type } => {
                v["list_type"] = json!(list_type);
            }
            StepKind::ProcessWithAi { request, context } => {
                v["request"] = json!(request);
                v["context"] = json!(context);
            }
        }
        v
    }
}

impl Serialize for WorkflowStep {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_wire().serialize(serializer)
    }
}

// -- Raw field helpers ------------------------------------------------------

fn text<'a>(obj: &'a Map<String, Value>, names: &[&str]) -> Option<&'a str> {
    names
        .iter()
        .filter_map(|name| obj.get(*name))
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|s| !s.is_empty())
}

fn string_list(obj: &Map<String, Value>, names: &[&str]) -> Vec<String> {
    names
        .iter()
        .filter_map(|name| obj.get(*name))
        .filter_map(Value::as_array)
        .flatten()
        .filter_map(Value::as_str)
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Amount as a decimal string; `.05` becomes `0.05`.
fn amount(obj: &Map<String, Value>) -> Option<String> {
    let raw = match obj.get("amount")? {
        Value::String(s) => s.trim().to_owned(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    let raw = raw
        .trim_end_matches(|c: char| c.is_ascii_alphabetic() || c.is_whitespace())
        .trim_start_matches('$')
        .to_owned();
    if raw.is_empty() {
        None
    } else if raw.starts_with('.') {
        Some(format!("0{raw}"))
    } else {
        Some(raw)
    }
}

/// Explicit proof id, or the `pending_<proofType>_<person>` placeholder.
fn verification_proof_id(
    obj: &Map<String, Value>,
    proof_type: Option<&str>,
    person: Option<&str>,
) -> Result<String, StepRejected> {
    if let Some(id) = text(obj, &["proof_id", "proofId"]) {
        return Ok(id.to_owned());
    }
    let proof_type =
        proof_type.ok_or_else(|| StepRejected("verification without proof_type or proof_id".into()))?;
    Ok(format!(
        "pending_{proof_type}_{}",
        person.unwrap_or(DEFAULT_PERSON)
    ))
}

// ---------------------------------------------------------------------------
// Graph
// ---------------------------------------------------------------------------

/// An ordered set of steps compiled from one command.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowGraph {
    /// The original command.
    pub description: String,
    pub steps: Vec<WorkflowStep>,
    pub requires_proofs: bool,
}

impl WorkflowGraph {
    /// Build a graph from typed steps, re-indexing them densely.
    pub fn new(description: impl Into<String>, kinds: Vec<(String, StepKind)>) -> Self {
        let steps = kinds
            .into_iter()
            .enumerate()
            .map(|(index, (description, kind))| WorkflowStep {
                index,
                description,
                kind,
            })
            .collect();
        Self::from_steps(description, steps)
    }

    /// Normalize loosely-typed records into a graph.
    ///
    /// Unrecognized or unusable records are dropped with a warning; the
    /// survivors are re-indexed so `steps[i].index == i`.
    pub fn from_raw(description: impl Into<String>, raw_steps: &[Value]) -> Self {
        let steps = raw_steps
            .iter()
            .enumerate()
            .filter_map(|(position, raw)| match WorkflowStep::from_raw(position, raw) {
                Ok(step) => Some(step),
                Err(rejected) => {
                    warn!(position, reason = %rejected.0, "dropping compiled step");
                    None
                }
            })
            .collect();
        Self::from_steps(description, steps)
    }

    fn from_steps(description: impl Into<String>, mut steps: Vec<WorkflowStep>) -> Self {
        for (index, step) in steps.iter_mut().enumerate() {
            step.index = index;
        }
        let requires_proofs = steps.iter().any(|s| {
            matches!(
                s.kind,
                StepKind::GenerateProof { .. }
                    | StepKind::VerifyProof { .. }
                    | StepKind::VerifyOnLedger { .. }
            ) || !s.kind.requirements().is_empty()
        });
        Self {
            description: description.into(),
            steps,
            requires_proofs,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// The first AI-augmentation step, if the workflow asks for one.
    pub fn ai_request(&self) -> Option<(&str, &str)> {
        self.steps.iter().find_map(|s| match &s.kind {
            StepKind::ProcessWithAi { request, context } => Some((request.as_str(), context.as_str())),
            _ => None,
        })
    }
}

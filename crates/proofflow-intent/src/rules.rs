//! Deterministic shortcut compiler.
//!
//! Commands the classifier marks as *not* complex are first tried here.  The
//! command is split into clauses on sequencing connectives and each clause is
//! matched against a handful of patterns.  If any clause is not understood
//! the whole command is handed to the completion provider instead; a partial
//! graph is never returned.

use regex::{Captures, Regex};
use serde_json::{Map, Value, json};

use crate::error::{IntentError, Result};
use crate::workflow::{
    Ledger, ProofKey, StepKind, WorkflowGraph, condition_ledger, condition_proof_type,
};

const SPLIT: &str =
    r"(?i)\s*(?:,?\s*\b(?:and\s+then|then|after\s+that|followed\s+by|finally)\b|;)\s*";

const TRANSFER: &str = r"(?i)^(?:send|transfer|pay)\s+\$?(?P<amount>\d*\.?\d+)\s*(?:usdc|usd)?\s+to\s+(?P<recipient>[a-z]\w*)(?:\s+on\s+(?P<chain>\w+))?(?:\s+(?:if|when|once)\s+(?:(?:he|she|they|it)\s+(?:is|are)\s+)?(?P<condition>.+?))?\s*$";

const GENERATE_KNOWN: &str = r"(?i)^(?:generate|create|prove)\s+(?:an?\s+|the\s+)?(?P<kind>kyc|location|ai[\s_-]*content)(?:\s+proof)?(?:\s+(?:for|of|in)\s+(?P<subject>.+?))?\s*$";

const GENERATE_OTHER: &str = r"(?i)^(?:generate|create)\s+(?:an?\s+|the\s+)?(?P<kind>[a-z]\w*)\s+proof(?:\s+(?:for|of)\s+(?P<subject>[a-z]\w*))?\s*$";

const VERIFY: &str = r"(?i)^verify\b(?P<rest>.*)$";

const LIST: &str = r"(?i)^(?:list|show)\s+(?:all\s+|my\s+)?(?P<what>proofs?|verifications?)\s*$";

const AI_REQUEST: &str =
    r"(?i)^(?:explain|tell|translate|summarize|summarise|analy[sz]e|describe|make)\b.*$";

/// Cities the location prover knows coordinates for.
const CITIES: &[(&str, &str, f64, f64)] = &[
    ("nyc", "New York", 40.7128, -74.0060),
    ("new york", "New York", 40.7128, -74.0060),
    ("sf", "San Francisco", 37.7749, -122.4194),
    ("san francisco", "San Francisco", 37.7749, -122.4194),
    ("london", "London", 51.5074, -0.1278),
];

/// Pattern-based compiler for simple commands.
#[derive(Debug, Clone)]
pub struct RuleCompiler {
    split: Regex,
    transfer: Regex,
    generate_known: Regex,
    generate_other: Regex,
    verify: Regex,
    list: Regex,
    ai_request: Regex,
    proof_id: Regex,
    person: Regex,
}

/// What earlier clauses produced, for "verify it" style references.
#[derive(Debug, Default)]
struct Context {
    generated: Vec<ProofKey>,
    verified: Vec<ProofKey>,
    verified_on: Vec<(ProofKey, Ledger)>,
}

type Planned = Vec<(String, StepKind)>;

impl RuleCompiler {
    pub fn new() -> Result<Self> {
        Ok(Self {
            split: compile(SPLIT)?,
            transfer: compile(TRANSFER)?,
            generate_known: compile(GENERATE_KNOWN)?,
            generate_other: compile(GENERATE_OTHER)?,
            verify: compile(VERIFY)?,
            list: compile(LIST)?,
            ai_request: compile(AI_REQUEST)?,
            proof_id: compile(r"(?i)\b(proof_[\w-]+)")?,
            person: compile(r"(?i)\bfor\s+([a-z]\w*)")?,
        })
    }

    /// Compile `command`, or `None` if any clause is not understood.
    pub fn compile(&self, command: &str) -> Option<WorkflowGraph> {
        let mut ctx = Context::default();
        let mut planned: Planned = Vec::new();

        for clause in self
            .split
            .split(command.trim())
            .map(|c| c.trim().trim_end_matches(['.', '!']).trim())
            .filter(|c| !c.is_empty())
        {
            match self.clause(clause, &mut ctx) {
                Some(steps) => planned.extend(steps),
                None => {
                    tracing::debug!(clause = %clause, "rule compiler cannot parse clause");
                    return None;
                }
            }
        }

        let operational = planned
            .iter()
            .any(|(_, kind)| !matches!(kind, StepKind::ProcessWithAi { .. }));
        if !operational {
            return None;
        }

        Some(WorkflowGraph::new(command, planned))
    }

    fn clause(&self, clause: &str, ctx: &mut Context) -> Option<Planned> {
        if let Some(caps) = self.transfer.captures(clause) {
            return transfer(&caps, ctx);
        }
        if let Some(caps) = self
            .generate_known
            .captures(clause)
            .or_else(|| self.generate_other.captures(clause))
        {
            return Some(generate(&caps, ctx));
        }
        if let Some(caps) = self.verify.captures(clause) {
            return self.verify_clause(clause, caps.name("rest").map_or("", |m| m.as_str()), ctx);
        }
        if let Some(caps) = self.list.captures(clause) {
            let what = caps.name("what").map_or("proofs", |m| m.as_str()).to_lowercase();
            let list_type = if what.starts_with("verification") {
                "verifications"
            } else {
                "proofs"
            };
            return Some(vec![(
                format!("List {list_type}"),
                StepKind::ListProofs {
                    list_type: Some(list_type.to_owned()),
                },
            )]);
        }
        if self.ai_request.is_match(clause) {
            return Some(vec![(
                format!("AI: {clause}"),
                StepKind::ProcessWithAi {
                    request: clause.to_owned(),
                    context: "zero-knowledge proofs".to_owned(),
                },
            )]);
        }
        None
    }

    fn verify_clause(&self, clause: &str, rest: &str, ctx: &mut Context) -> Option<Planned> {
        let lowered = rest.to_lowercase();
        let proof_id = self
            .proof_id
            .captures(rest)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_owned());
        let ledger = Ledger::ALL.into_iter().find(|l| {
            lowered.contains(&format!("on {}", l.name()))
                || lowered.contains(&format!("on {}", l.tag().to_lowercase()))
        });
        let person = self
            .person
            .captures(rest)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_lowercase());

        // An explicit id such as `proof_kyc_123` names its own proof; its
        // text must not be read as a kind mention.
        let without_id = match &proof_id {
            Some(id) => lowered.replace(&id.to_lowercase(), ""),
            None => lowered.clone(),
        };
        let mentioned = proof_kind(&without_id);
        let from_ctx = |kind: Option<&str>| {
            ctx.generated
                .iter()
                .rev()
                .find(|k| kind.is_none_or(|kind| k.proof_type == kind))
                .cloned()
        };
        let key = match (mentioned, &person, &proof_id) {
            (Some(kind), Some(p), _) => Some(ProofKey::new(kind, Some(p.as_str()))),
            (Some(kind), None, None) => {
                from_ctx(Some(kind)).or_else(|| Some(ProofKey::new(kind, None)))
            }
            (Some(kind), None, Some(_)) => from_ctx(Some(kind)),
            (None, Some(p), None) => ctx
                .generated
                .iter()
                .rev()
                .find(|k| k.person == *p)
                .cloned(),
            (None, None, None) => from_ctx(None),
            (None, _, Some(_)) => None,
        };

        if key.is_none() && proof_id.is_none() {
            return None;
        }

        let proof_id = proof_id.unwrap_or_else(|| match &key {
            Some(k) => format!("pending_{}_{}", k.proof_type, k.person),
            None => String::new(),
        });
        let person = key.as_ref().map(|k| k.person.clone());
        let proof_type = key.as_ref().map(|k| k.proof_type.clone());

        let kind = match ledger {
            Some(ledger) => {
                if let Some(k) = &key {
                    ctx.verified_on.push((k.clone(), ledger));
                }
                StepKind::VerifyOnLedger {
                ledger,
                proof_type,
                person,
                proof_id,
                }
            }
            None => {
                if let Some(k) = &key {
                    ctx.verified.push(k.clone());
                }
                StepKind::VerifyProof {
                    proof_type,
                    person,
                    proof_id,
                }
            }
        };
        Some(vec![(capitalize(clause), kind)])
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| IntentError::InvalidPattern {
        pattern: pattern.to_owned(),
        reason: e.to_string(),
    })
}

/// Proof kind mentioned in free text.
fn proof_kind(lowered: &str) -> Option<&'static str> {
    if lowered.contains("kyc") {
        Some("kyc")
    } else if lowered.contains("location") {
        Some("location")
    } else if lowered.contains("ai content")
        || lowered.contains("ai_content")
        || lowered.contains("ai-content")
    {
        Some("ai_content")
    } else {
        None
    }
}

fn generate(caps: &Captures<'_>, ctx: &mut Context) -> Planned {
    let raw_kind = caps.name("kind").map_or("", |m| m.as_str()).to_lowercase();
    let proof_type = proof_kind(&raw_kind)
        .map(str::to_owned)
        .unwrap_or(raw_kind);
    let subject = caps.name("subject").map(|m| m.as_str().trim().to_lowercase());

    let mut parameters = Map::new();
    let mut person = None;
    match (proof_type.as_str(), subject) {
        ("location", Some(place)) => {
            if let Some((_, city, lat, lon)) = CITIES.iter().find(|(alias, ..)| *alias == place) {
                parameters.insert("city".into(), json!(city));
                parameters.insert("latitude".into(), json!(lat));
                parameters.insert("longitude".into(), json!(lon));
            } else {
                parameters.insert("city".into(), Value::String(place));
            }
        }
        (_, Some(who)) => person = Some(who),
        _ => {}
    }

    let description = match &person {
        Some(p) => format!("Generate {} proof for {p}", proof_type.to_uppercase()),
        None => format!("Generate {} proof", proof_type.to_uppercase()),
    };
    ctx.generated
        .push(ProofKey::new(proof_type.clone(), person.as_deref()));

    vec![(
        description,
        StepKind::GenerateProof {
            proof_type,
            person,
            parameters,
        },
    )]
}

/// A transfer clause, optionally gated on a verified proof of the
/// recipient.  A condition naming no proof kind is not understood here.
fn transfer(caps: &Captures<'_>, ctx: &mut Context) -> Option<Planned> {
    let raw_amount = caps.name("amount").map_or("0", |m| m.as_str());
    let amount = if raw_amount.starts_with('.') {
        format!("0{raw_amount}")
    } else {
        raw_amount.to_owned()
    };
    let recipient = caps
        .name("recipient")
        .map_or("", |m| m.as_str())
        .to_lowercase();
    let ledger = caps
        .name("chain")
        .map_or(Ledger::Ethereum, |m| Ledger::from_mention(m.as_str()));

    let mut planned: Planned = Vec::new();
    let condition = match caps.name("condition") {
        Some(cond) => {
            let proof_type = condition_proof_type(cond.as_str())?;
            let verify_ledger = condition_ledger(cond.as_str());
            let key = ProofKey::new(proof_type.clone(), Some(recipient.as_str()));
            let label = proof_type.to_uppercase();

            if !ctx.generated.contains(&key) {
                planned.push((
                    format!("Generate {label} proof for {recipient}"),
                    StepKind::GenerateProof {
                        proof_type: proof_type.clone(),
                        person: Some(recipient.clone()),
                        parameters: Map::new(),
                    },
                ));
                ctx.generated.push(key.clone());
            }

            match verify_ledger {
                Some(on) => {
                    let entry = (key.clone(), on);
                    if !ctx.verified_on.contains(&entry) {
                        planned.push((
                            format!("Verify {label} proof for {recipient} on {}", capitalize(on.name())),
                            StepKind::VerifyOnLedger {
                                ledger: on,
                                proof_type: Some(proof_type.clone()),
                                person: Some(recipient.clone()),
                                proof_id: format!("pending_{key}"),
                            },
                        ));
                        ctx.verified_on.push(entry);
                    }
                    Some(format!("{proof_type}_verified_on_{}", on.name()))
                }
                None => {
                    if !ctx.verified.contains(&key) {
                        planned.push((
                            format!("Verify {label} proof for {recipient}"),
                            StepKind::VerifyProof {
                                proof_type: Some(proof_type.clone()),
                                person: Some(recipient.clone()),
                                proof_id: format!("pending_{key}"),
                            },
                        ));
                        ctx.verified.push(key);
                    }
                    Some(format!("{proof_type}_verified"))
                }
            }
        }
        None => None,
    };

    planned.push((
        format!("Send {amount} USDC to {recipient} on {ledger}"),
        StepKind::Transfer {
            amount,
            recipient,
            ledger,
            condition,
            required_proof_types: Vec::new(),
        },
    ));
    Some(planned)
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

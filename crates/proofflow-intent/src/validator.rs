//! Causal-ordering validation of step graphs.
//!
//! Walks steps in index order tracking which proof keys have been generated,
//! locally verified, and verified on each ledger.  A verification needs an
//! earlier generation of the same key; a conditional transfer needs its
//! proof generated (or verified), plus an on-chain verification when its
//! condition names a ledger.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tracing::warn;

use crate::workflow::{Ledger, ProofKey, StepKind, WorkflowGraph};

/// One ordering violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Violation {
    pub step_index: usize,
    /// The proof key that was missing, e.g. `kyc_alice`.
    pub key: String,
    pub message: String,
}

/// Full validation outcome; [`validate`] is the boolean view of it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    /// Human-readable lines, one per violation.
    pub fn messages(&self) -> Vec<String> {
        self.violations.iter().map(|v| v.message.clone()).collect()
    }
}

/// `true` when every verification and conditional transfer is preceded by
/// the steps it depends on.
pub fn validate(graph: &WorkflowGraph) -> bool {
    check(graph).is_valid()
}

/// Validate and collect every violation instead of stopping at the first.
pub fn check(graph: &WorkflowGraph) -> ValidationReport {
    let mut generated: HashSet<ProofKey> = HashSet::new();
    let mut verified: HashSet<ProofKey> = HashSet::new();
    let mut on_ledger: HashMap<Ledger, HashSet<ProofKey>> = HashMap::new();
    let mut report = ValidationReport::default();

    let mut steps: Vec<_> = graph.steps.iter().collect();
    steps.sort_by_key(|s| s.index);

    for step in steps {
        match &step.kind {
            StepKind::GenerateProof { .. } => {
                if let Some(key) = step.kind.proof_key() {
                    generated.insert(key);
                }
            }
            StepKind::VerifyProof { .. } | StepKind::VerifyOnLedger { .. } => {
                let Some(key) = step.kind.proof_key() else {
                    continue;
                };
                if !generated.contains(&key) {
                    report.violations.push(Violation {
                        step_index: step.index,
                        message: format!(
                            "step {} ({}) verifies `{key}` before it is generated",
                            step.index,
                            step.kind.type_name()
                        ),
                        key: key.to_string(),
                    });
                    continue;
                }
                match &step.kind {
                    StepKind::VerifyOnLedger { ledger, .. } => {
                        on_ledger.entry(*ledger).or_default().insert(key);
                    }
                    _ => {
                        verified.insert(key);
                    }
                }
            }
            StepKind::Transfer { .. } => {
                for requirement in step.kind.requirements() {
                    let key = &requirement.key;
                    let on_any_ledger = on_ledger.values().any(|keys| keys.contains(key));
                    if !(generated.contains(key) || verified.contains(key) || on_any_ledger) {
                        report.violations.push(Violation {
                            step_index: step.index,
                            message: format!(
                                "step {} (transfer) depends on `{key}` which is never generated before it",
                                step.index
                            ),
                            key: key.to_string(),
                        });
                        continue;
                    }
                    if let Some(ledger) = requirement.ledger {
                        let on_this_ledger = on_ledger
                            .get(&ledger)
                            .is_some_and(|keys| keys.contains(key));
                        if !(on_this_ledger || verified.contains(key)) {
                            report.violations.push(Violation {
                                step_index: step.index,
                                message: format!(
                                    "step {} (transfer) needs `{key}` verified on {} first",
                                    step.index,
                                    ledger.name()
                                ),
                                key: key.to_string(),
                            });
                        }
                    }
                }
            }
            StepKind::ListProofs { .. } | StepKind::ProcessWithAi { .. } => {}
        }
    }

    for violation in &report.violations {
        warn!(step = violation.step_index, key = %violation.key, "workflow ordering violation");
    }

    report
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

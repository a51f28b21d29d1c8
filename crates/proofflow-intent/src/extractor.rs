//! Result extraction from executor output.
//!
//! The external executor prints human-readable progress.  Facts are recovered
//! line by line from literal markers; no structure is assumed and missing
//! markers simply produce empty collections.

use std::collections::{BTreeMap, BTreeSet};

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use serde::{Deserialize, Serialize};

/// Marker the executor prints on a successful proof operation.
const SUCCESS_MARKER: &str = "✅";

/// Marker the executor prints on a failed step.
const FAILURE_MARKER: &str = "❌";

const TRANSFER_LABEL: &str = "Transfer ID:";
const TRANSFER_KEY: &str = "transferId";

/// Literal proof-kind labels and the summary key each one maps to.
const PROOF_KINDS: [(&str, &str); 3] = [
    ("kyc:", "kyc"),
    ("location:", "location"),
    ("ai_content:", "ai_content"),
];

/// Length of a hyphenated transfer identifier (UUID text form).
const TRANSFER_ID_LEN: usize = 36;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProofStatus {
    Generated,
    Verified,
}

impl ProofStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Generated => "generated",
            Self::Verified => "verified",
        }
    }
}

/// Latest reported state of one proof kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofRecord {
    pub status: ProofStatus,
    pub proof_id: Option<String>,
}

/// Everything recovered from one run's standard output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Extraction {
    pub transfer_ids: BTreeSet<String>,
    pub proof_summary: BTreeMap<String, ProofRecord>,
    /// Lines the executor flagged as failed steps.
    pub failures: Vec<String>,
}

/// Line scanner for executor output.  Build once and share.
#[derive(Debug, Clone)]
pub struct ResultExtractor {
    kinds: AhoCorasick,
}

impl ResultExtractor {
    pub fn new() -> crate::Result<Self> {
        let kinds = AhoCorasickBuilder::new()
            .ascii_case_insensitive(true)
            .match_kind(MatchKind::LeftmostFirst)
            .build(PROOF_KINDS.iter().map(|(label, _)| label))
            .map_err(|e| crate::IntentError::InvalidPattern {
                pattern: "proof kinds".into(),
                reason: e.to_string(),
            })?;
        Ok(Self { kinds })
    }

    /// Scan `stdout`.  Never fails.
    pub fn extract(&self, stdout: &str) -> Extraction {
        let mut out = Extraction::default();

        for line in stdout.lines() {
            if let Some(id) = transfer_id(line) {
                out.transfer_ids.insert(id);
            }

            if line.contains(FAILURE_MARKER) {
                out.failures.push(line.trim().to_owned());
            }

            if let Some((kind, record)) = self.proof(line) {
                out.proof_summary.insert(kind.to_owned(), record);
            }
        }

        tracing::debug!(
            transfers = out.transfer_ids.len(),
            proofs = out.proof_summary.len(),
            failures = out.failures.len(),
            "executor output scanned"
        );
        out
    }

    fn proof(&self, line: &str) -> Option<(&'static str, ProofRecord)> {
        if !line.contains(SUCCESS_MARKER) {
            return None;
        }
        let lowered = line.to_lowercase();
        let verified = lowered.contains("verified");
        if !verified && !lowered.contains("generated") {
            return None;
        }

        let found = self.kinds.find(line)?;
        let (_, kind) = PROOF_KINDS[found.pattern().as_usize()];

        let proof_id = line.find('(').and_then(|open| {
            let rest = &line[open + 1..];
            rest.find(')')
                .map(|close| rest[..close].trim().to_owned())
                .filter(|id| !id.is_empty())
        });

        let status = if verified {
            ProofStatus::Verified
        } else {
            ProofStatus::Generated
        };
        Some((kind, ProofRecord { status, proof_id }))
    }
}

/// Transfer identifier on a line, from either the `Transfer ID:` label or a
/// `transferId` key/value pair.
fn transfer_id(line: &str) -> Option<String> {
    let after = if let Some(pos) = line.find(TRANSFER_LABEL) {
        &line[pos + TRANSFER_LABEL.len()..]
    } else {
        let pos = line.find(TRANSFER_KEY)?;
        let rest = &line[pos + TRANSFER_KEY.len()..];
        let colon = rest.find(':')?;
        &rest[colon + 1..]
    };

    let token = after
        .split_whitespace()
        .next()?
        .trim_matches(|c: char| matches!(c, '"' | '\'' | ',' | ';' | '}' | ')'));
    is_transfer_id(token).then(|| token.to_owned())
}

fn is_transfer_id(token: &str) -> bool {
    token.len() == TRANSFER_ID_LEN
        && token.contains('-')
        && token.chars().all(|c| c.is_ascii_hexdigit() || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID_A: &str = "3f1c2a9e-5b7d-4e8f-9a0b-1c2d3e4f5a6b";
    const ID_B: &str = "0a1b2c3d-4e5f-6071-8293-a4b5c6d7e8f9";

    fn extractor() -> ResultExtractor {
        ResultExtractor::new().unwrap()
    }

    #[test]
    fn empty_output_is_empty_extraction() {
        assert_eq!(extractor().extract(""), Extraction::default());
    }

    #[test]
    fn verified_kyc_line() {
        let out = extractor().extract("kyc: ✅ verified (proof_kyc_123)");
        assert_eq!(out.proof_summary.len(), 1);
        assert_eq!(
            out.proof_summary["kyc"],
            ProofRecord {
                status: ProofStatus::Verified,
                proof_id: Some("proof_kyc_123".into()),
            }
        );
        let v = serde_json::to_value(&out.proof_summary).unwrap();
        assert_eq!(
            v,
            serde_json::json!({"kyc": {"status": "verified", "proofId": "proof_kyc_123"}})
        );
    }

    #[test]
    fn later_line_overrides_earlier_for_same_kind() {
        let out = extractor().extract(
            "   location: ✅ generated (proof_loc_1)\n   location: ✅ verified (proof_loc_1)\n",
        );
        assert_eq!(out.proof_summary["location"].status, ProofStatus::Verified);
    }

    #[test]
    fn unrecognized_kinds_and_unmarked_lines_are_ignored() {
        let out = extractor().extract(
            "collatz: ✅ verified (proof_c)\nkyc: verified (no marker)\nkyc: ✅ pending (p)\n",
        );
        assert!(out.proof_summary.is_empty());
    }

    #[test]
    fn proof_without_parentheses_has_no_id() {
        let out = extractor().extract("AI_CONTENT: ✅ generated");
        assert_eq!(out.proof_summary["ai_content"].proof_id, None);
    }

    #[test]
    fn transfer_ids_from_label_and_key_are_deduplicated() {
        let stdout = format!(
            "   Transfer ID: {ID_A}\n{{\"transferId\": \"{ID_A}\", \"status\": \"pending\"}}\ntransferId: '{ID_B}',\n"
        );
        let out = extractor().extract(&stdout);
        assert_eq!(out.transfer_ids.len(), 2);
        assert!(out.transfer_ids.contains(ID_A));
        assert!(out.transfer_ids.contains(ID_B));
    }

    #[test]
    fn short_or_unhyphenated_tokens_are_not_transfer_ids() {
        let out = extractor().extract(
            "Transfer ID: pending\nTransfer ID: 3f1c2a9e5b7d4e8f9a0b1c2d3e4f5a6b1234\n",
        );
        assert!(out.transfer_ids.is_empty());
    }

    #[test]
    fn failure_lines_are_collected() {
        let out = extractor().extract("❌ transfer to bob failed: insufficient funds\n");
        assert_eq!(out.failures.len(), 1);
    }
}

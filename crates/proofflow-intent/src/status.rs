//! Transfer status normalization.
//!
//! The status-lookup script prints prose with zero or more JSON objects
//! embedded in it, or plain `Key: value` lines.  [`normalize`] reduces any of
//! those to one [`TransferStatus`].  Parsing problems never surface as
//! errors; they degrade to a `pending` status.

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info};

use proofflow_adapters::{AdapterError, CommandLine, ProcessRunner};

use crate::config::PipelineConfig;
use crate::error::{IntentError, Result};
use crate::workflow::Ledger;

/// Status used when nothing usable could be read.
pub const DEFAULT_STATUS: &str = "pending";

/// Hash values that mean "no hash yet".
const NOT_A_HASH: [&str; 5] = ["", "pending", "null", "none", "n/a"];

/// Canonical result of one status poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferStatus {
    /// The rail's own vocabulary, e.g. `pending`, `complete`, `failed`.
    pub status: String,
    pub transaction_hash: Option<String>,
    /// Explorer URL, or an informational note while an asynchronously
    /// finalizing ledger has no hash yet.
    pub explorer_link: Option<String>,
    pub blockchain: Ledger,
}

/// A normalized status plus the text it was read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    #[serde(flatten)]
    pub status: TransferStatus,
    pub raw_output: String,
    /// Exit code of the lookup script; nonzero means the lookup itself failed.
    #[serde(skip)]
    pub exit_code: i32,
    #[serde(skip)]
    pub stderr: String,
}

impl StatusReport {
    pub fn lookup_succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Reduce status-lookup output to a [`TransferStatus`].
pub fn normalize(text: &str, transfer_id: &str, ledger: Ledger) -> TransferStatus {
    let objects = extract_json_objects(text);
    let chosen = objects
        .iter()
        .find(|obj| obj.contains_key("status"))
        .or_else(|| objects.first());

    let normalized = match chosen {
        Some(obj) => from_object(obj, transfer_id, ledger),
        None => from_lines(text, ledger),
    };
    debug!(
        transfer_id = %transfer_id,
        objects = objects.len(),
        status = %normalized.status,
        has_hash = normalized.transaction_hash.is_some(),
        "transfer status normalized"
    );
    normalized
}

fn from_object(obj: &Map<String, Value>, transfer_id: &str, ledger: Ledger) -> TransferStatus {
    let status = match obj.get("status") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_owned(),
        Some(Value::Number(n)) => n.to_string(),
        _ => DEFAULT_STATUS.to_owned(),
    };

    let chain = obj
        .get("destination")
        .and_then(|d| d.get("chain"))
        .and_then(Value::as_str)
        .and_then(|c| c.parse::<Ledger>().ok())
        .unwrap_or(ledger);

    let mut candidates = vec![
        obj.get("transactionHash"),
        obj.get("txHash"),
        obj.get("blockchainLocation").and_then(|l| l.get("txHash")),
    ];
    if chain == Ledger::Solana {
        candidates.push(obj.get("transactionId"));
    }
    let transaction_hash = candidates
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .find_map(hash_value);

    let explorer_link = match &transaction_hash {
        Some(hash) => Some(chain.explorer_link(hash)),
        None if status.eq_ignore_ascii_case("complete") && chain.finalizes_async() => Some(
            format!("Transfer ID: {transfer_id} (Solana tx pending finality)"),
        ),
        None => None,
    };

    TransferStatus {
        status,
        transaction_hash,
        explorer_link,
        blockchain: chain,
    }
}

/// Fallback for output with no parseable object: `Key: value` lines and a
/// "View on Explorer:" phrase.
fn from_lines(text: &str, ledger: Ledger) -> TransferStatus {
    let mut status: Option<String> = None;
    let mut transaction_hash: Option<String> = None;
    let mut explorer_link: Option<String> = None;

    for line in text.lines() {
        if let Some(pos) = line.find("View on Explorer:") {
            let rest = &line[pos + "View on Explorer:".len()..];
            if let Some(url) = rest.split_whitespace().find(|w| w.starts_with("https://")) {
                explorer_link.get_or_insert_with(|| url.to_owned());
            }
            continue;
        }

        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key
            .trim()
            .trim_matches(|c| c == '"' || c == '\'' || c == '{' || c == ',')
            .trim()
            .to_lowercase();
        let value = first_word(value);

        match key.as_str() {
            "status" if status.is_none() => status = value,
            "transactionhash" | "transaction hash" | "txhash" if transaction_hash.is_none() => {
                transaction_hash = value.as_deref().and_then(hash_value);
            }
            _ => {}
        }
    }

    if explorer_link.is_none() {
        explorer_link = transaction_hash.as_deref().map(|h| ledger.explorer_link(h));
    }

    TransferStatus {
        status: status.unwrap_or_else(|| DEFAULT_STATUS.to_owned()),
        transaction_hash,
        explorer_link,
        blockchain: ledger,
    }
}

/// Leading token of a `key: value` tail, stopping at JSON punctuation.
fn first_word(value: &str) -> Option<String> {
    let word: String = value
        .trim_start()
        .trim_start_matches(['"', '\''])
        .chars()
        .take_while(|c| !c.is_whitespace() && !matches!(c, ',' | '"' | '\'' | '}'))
        .collect();
    (!word.is_empty()).then_some(word)
}

fn hash_value(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let lowered = trimmed.to_lowercase();
    (!NOT_A_HASH.contains(&lowered.as_str())).then(|| trimmed.to_owned())
}

/// Every balanced `{...}` region of `text` that parses as a JSON object, in
/// order of appearance.  Braces inside string literals are not counted.  A
/// `{` that never closes, or whose region does not parse, is skipped and the
/// scan resumes at the next `{`.
pub fn extract_json_objects(text: &str) -> Vec<Map<String, Value>> {
    let mut objects = Vec::new();
    let mut from = 0usize;

    while let Some(offset) = text[from..].find('{') {
        let start = from + offset;
        let parsed = balanced_len(&text[start..]).and_then(|len| {
            match serde_json::from_str(&text[start..start + len]) {
                Ok(Value::Object(obj)) => Some((obj, len)),
                _ => None,
            }
        });
        match parsed {
            Some((obj, len)) => {
                objects.push(obj);
                from = start + len;
            }
            None => from = start + 1,
        }
    }
    objects
}

/// Byte length of the balanced region opening at the first byte of `text`.
fn balanced_len(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Poller
// ---------------------------------------------------------------------------

/// Runs the status-lookup script on demand.  Holds no state between polls.
#[derive(Debug, Clone)]
pub struct TransferStatusPoller {
    runner: ProcessRunner,
    command: CommandLine,
}

impl TransferStatusPoller {
    pub fn new(runner: ProcessRunner, command: CommandLine) -> Self {
        Self { runner, command }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        let mut runner = ProcessRunner::new(config.status_timeout());
        if let Some(dir) = &config.executor_working_dir {
            runner = runner.with_working_dir(dir.clone());
        }
        Self::new(runner, config.status_command.clone())
    }

    /// Poll one transfer.  The script receives the transfer id and the ledger
    /// tag as arguments.
    pub async fn poll(&self, transfer_id: &str, ledger: Ledger) -> Result<StatusReport> {
        let transfer_id = transfer_id.trim();
        if transfer_id.is_empty() {
            return Err(IntentError::StatusPoll {
                reason: "Transfer ID required".into(),
            });
        }

        let output = self
            .runner
            .run(&self.command, &[transfer_id, ledger.tag()])
            .await
            .map_err(|e| match e {
                AdapterError::Timeout { limit, .. } => IntentError::StatusPollTimeout { limit },
                other => IntentError::StatusPoll {
                    reason: other.to_string(),
                },
            })?;

        // Scripts print diagnostics to stderr on failure; scan both.
        let raw_output = if output.stdout.trim().is_empty() {
            output.stderr.clone()
        } else {
            output.stdout
        };
        let status = normalize(&raw_output, transfer_id, ledger);
        info!(
            transfer_id = %transfer_id,
            ledger = %ledger,
            status = %status.status,
            exit_code = output.exit_code,
            "transfer polled"
        );
        Ok(StatusReport {
            status,
            raw_output,
            exit_code: output.exit_code,
            stderr: output.stderr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_eth_transfer_gets_etherscan_link() {
        let s = normalize(
            r#"{"status":"complete","transactionHash":"0xabc"}"#,
            "t-1",
            Ledger::Ethereum,
        );
        assert_eq!(s.status, "complete");
        assert_eq!(s.transaction_hash.as_deref(), Some("0xabc"));
        assert_eq!(
            s.explorer_link.as_deref(),
            Some("https://sepolia.etherscan.io/tx/0xabc")
        );
        assert_eq!(s.blockchain, Ledger::Ethereum);
    }

    #[test]
    fn prose_around_several_objects_prefers_one_with_status() {
        let text = r#"Checking transfer...
        meta: {"requestId": "r1", "note": "braces } in { strings"}
        result: {"id": "t", "status": "pending", "destination": {"chain": "SOL"}}
        done"#;
        let s = normalize(text, "t", Ledger::Ethereum);
        assert_eq!(s.status, "pending");
        assert_eq!(s.blockchain, Ledger::Solana);
        assert_eq!(s.transaction_hash, None);
        assert_eq!(s.explorer_link, None);
    }

    #[test]
    fn falls_back_to_first_object_without_status() {
        let s = normalize(r#"{"txHash": "5xyz"} {"other": 1}"#, "t", Ledger::Solana);
        assert_eq!(s.status, DEFAULT_STATUS);
        assert_eq!(
            s.explorer_link.as_deref(),
            Some("https://explorer.solana.com/tx/5xyz?cluster=devnet")
        );
    }

    #[test]
    fn nested_hash_and_destination_chain() {
        let text = r#"{"status":"complete","blockchainLocation":{"txHash":"0xdef"},"destination":{"chain":"BASE"}}"#;
        let s = normalize(text, "t", Ledger::Ethereum);
        assert_eq!(s.transaction_hash.as_deref(), Some("0xdef"));
        assert_eq!(
            s.explorer_link.as_deref(),
            Some("https://sepolia.basescan.org/tx/0xdef")
        );
    }

    #[test]
    fn solana_transaction_id_counts_only_on_solana() {
        let text = r#"{"status":"complete","transactionId":"sig123"}"#;
        assert_eq!(
            normalize(text, "t", Ledger::Solana).transaction_hash.as_deref(),
            Some("sig123")
        );
        assert_eq!(normalize(text, "t", Ledger::Ethereum).transaction_hash, None);
    }

    #[test]
    fn solana_complete_without_hash_is_informational() {
        let s = normalize(r#"{"status":"complete"}"#, "abc-123", Ledger::Solana);
        assert_eq!(s.transaction_hash, None);
        assert_eq!(
            s.explorer_link.as_deref(),
            Some("Transfer ID: abc-123 (Solana tx pending finality)")
        );
    }

    #[test]
    fn line_oriented_output() {
        let text = "Transfer found\nStatus: complete (settled)\nTransaction Hash: 0x77 \n";
        let s = normalize(text, "t", Ledger::Ethereum);
        assert_eq!(s.status, "complete");
        assert_eq!(s.transaction_hash.as_deref(), Some("0x77"));
        assert_eq!(
            s.explorer_link.as_deref(),
            Some("https://sepolia.etherscan.io/tx/0x77")
        );
    }

    #[test]
    fn broken_json_falls_back_to_substring_search() {
        let text = "{ status: 'complete',\n  \"transactionHash\": \"0x99\",\n View on Explorer: https://example.org/tx/0x99\n";
        let s = normalize(text, "t", Ledger::Ethereum);
        assert_eq!(s.transaction_hash.as_deref(), Some("0x99"));
        assert_eq!(
            s.explorer_link.as_deref(),
            Some("https://example.org/tx/0x99")
        );
    }

    #[test]
    fn unmatched_brace_before_object_does_not_hide_it() {
        let text = "Fetching transfer {pending\n{\"status\":\"complete\",\"transactionHash\":\"0xabc\"}\n";
        let s = normalize(text, "t", Ledger::Ethereum);
        assert_eq!(s.status, "complete");
        assert_eq!(s.transaction_hash.as_deref(), Some("0xabc"));
    }

    #[test]
    fn objects_inside_unparseable_regions_are_found() {
        let objects = extract_json_objects(r#"{note {"status": "failed"}} and {"id": 2}"#);
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0]["status"], "failed");
        assert_eq!(objects[1]["id"], 2);
    }

    #[test]
    fn json_shaped_line_yields_clean_status() {
        let s = normalize(r#""status":"complete","transactionHash":"0xabc""#, "t", Ledger::Ethereum);
        assert_eq!(s.status, "complete");
        assert_eq!(first_word(r#""complete","x":1"#).as_deref(), Some("complete"));
        assert_eq!(first_word(" 0x12, next").as_deref(), Some("0x12"));
    }

    #[test]
    fn garbage_is_pending_without_hash() {
        let s = normalize("Error: network unreachable", "t", Ledger::Ethereum);
        assert_eq!(s.status, DEFAULT_STATUS);
        assert_eq!(s.transaction_hash, None);
        assert_eq!(s.explorer_link, None);
    }

    #[test]
    fn pending_hash_placeholder_is_not_a_hash() {
        let s = normalize(r#"{"status":"pending","transactionHash":"pending"}"#, "t", Ledger::Ethereum);
        assert_eq!(s.transaction_hash, None);
        assert_eq!(s.explorer_link, None);
    }

    #[test]
    fn extract_handles_escaped_quotes() {
        let objects = extract_json_objects(r#"x {"a": "q\"}"} y {"b": 2}"#);
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[1]["b"], 2);
    }
}

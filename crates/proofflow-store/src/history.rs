//! Workflow history: one row per executed command.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::db::Database;
use crate::error::{StoreError, StoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    fn parse(s: &str) -> StoreResult<Self> {
        match s {
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(StoreError::InvalidArgument(format!("unknown run status `{other}`"))),
        }
    }
}

/// What the caller knows about a finished run.
#[derive(Debug, Clone, PartialEq)]
pub struct NewHistoryEntry {
    pub id: String,
    pub description: String,
    /// JSON array of the steps that were (or would have been) executed.
    pub steps: Value,
    pub status: RunStatus,
    pub transfer_ids: Vec<String>,
    pub proof_summary: Value,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: String,
    pub description: String,
    pub steps: Value,
    pub step_count: usize,
    pub status: RunStatus,
    pub transfer_ids: Vec<String>,
    pub proof_summary: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct HistoryStore {
    db: Database,
}

impl HistoryStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Persist a run, stamped with the current time.
    #[instrument(skip(self, entry), fields(id = %entry.id, status = entry.status.as_str()))]
    pub async fn record(&self, entry: NewHistoryEntry) -> StoreResult<HistoryEntry> {
        if !entry.steps.is_array() {
            return Err(StoreError::InvalidArgument("steps must be a JSON array".into()));
        }
        let created_at = Utc::now();
        let stored = HistoryEntry {
            step_count: step_count(&entry.steps),
            id: entry.id,
            description: entry.description,
            steps: entry.steps,
            status: entry.status,
            transfer_ids: entry.transfer_ids,
            proof_summary: entry.proof_summary,
            error: entry.error,
            created_at,
        };

        let row = (
            stored.id.clone(),
            stored.description.clone(),
            serde_json::to_string(&stored.steps)?,
            stored.status.as_str(),
            serde_json::to_string(&stored.transfer_ids)?,
            serde_json::to_string(&stored.proof_summary)?,
            stored.error.clone(),
            created_at.timestamp_millis(),
        );
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO workflow_history \
                     (id, description, steps, status, transfer_ids, proof_summary, error, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    rusqlite::params![row.0, row.1, row.2, row.3, row.4, row.5, row.6, row.7],
                )?;
                Ok(())
            })
            .await?;

        debug!(steps = stored.step_count, "workflow run recorded");
        Ok(stored)
    }

    /// Newest entries first, at most `limit` of them.
    #[instrument(skip(self))]
    pub async fn recent(&self, limit: usize) -> StoreResult<Vec<HistoryEntry>> {
        let limit = i64::try_from(limit)
            .map_err(|_| StoreError::InvalidArgument(format!("limit {limit} too large")))?;
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, description, steps, status, transfer_ids, proof_summary, error, created_at \
                     FROM workflow_history ORDER BY created_at DESC, rowid DESC LIMIT ?1",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![limit], HistoryRow::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows.into_iter().map(HistoryRow::into_entry).collect()
            })
            .await
    }

    #[instrument(skip(self))]
    pub async fn get(&self, id: &str) -> StoreResult<HistoryEntry> {
        let id = id.to_owned();
        self.db
            .execute(move |conn| {
                let row = conn.query_row(
                    "SELECT id, description, steps, status, transfer_ids, proof_summary, error, created_at \
                     FROM workflow_history WHERE id = ?1",
                    rusqlite::params![id],
                    HistoryRow::from_row,
                );
                match row {
                    Ok(row) => row.into_entry(),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Err(StoreError::NotFound {
                        entity: "workflow run",
                        id,
                    }),
                    Err(e) => Err(e.into()),
                }
            })
            .await
    }

    pub async fn count(&self) -> StoreResult<u64> {
        self.db
            .execute(|conn| {
                let n: i64 = conn.query_row("SELECT count(*) FROM workflow_history", [], |row| row.get(0))?;
                Ok(n.max(0) as u64)
            })
            .await
    }
}

fn step_count(steps: &Value) -> usize {
    steps.as_array().map_or(0, Vec::len)
}

/// Raw column values, decoded outside the rusqlite row callback.
struct HistoryRow {
    id: String,
    description: String,
    steps: String,
    status: String,
    transfer_ids: String,
    proof_summary: String,
    error: Option<String>,
    created_at: i64,
}

impl HistoryRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            description: row.get(1)?,
            steps: row.get(2)?,
            status: row.get(3)?,
            transfer_ids: row.get(4)?,
            proof_summary: row.get(5)?,
            error: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    fn into_entry(self) -> StoreResult<HistoryEntry> {
        let steps: Value = serde_json::from_str(&self.steps)?;
        let created_at = Utc
            .timestamp_millis_opt(self.created_at)
            .single()
            .ok_or_else(|| StoreError::InvalidArgument(format!("bad timestamp {}", self.created_at)))?;
        Ok(HistoryEntry {
            step_count: step_count(&steps),
            id: self.id,
            description: self.description,
            steps,
            status: RunStatus::parse(&self.status)?,
            transfer_ids: serde_json::from_str(&self.transfer_ids)?,
            proof_summary: serde_json::from_str(&self.proof_summary)?,
            error: self.error,
            created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    async fn store() -> HistoryStore {
        let db = Database::open_in_memory().unwrap();
        db.run_migrations().await.unwrap();
        HistoryStore::new(db)
    }

    fn entry(id: &str, steps: usize) -> NewHistoryEntry {
        NewHistoryEntry {
            id: id.into(),
            description: format!("command {id}"),
            steps: Value::Array((0..steps).map(|i| json!({"index": i, "type": "list_proofs"})).collect()),
            status: RunStatus::Completed,
            transfer_ids: Vec::new(),
            proof_summary: json!({}),
            error: None,
        }
    }

    #[tokio::test]
    async fn record_and_get_round_trip() {
        let store = store().await;
        let mut new = entry("wf_1", 2);
        new.transfer_ids = vec!["3f1c2a9e-5b7d-4e8f-9a0b-1c2d3e4f5a6b".into()];
        new.proof_summary = json!({"kyc": {"status": "verified", "proofId": "p1"}});
        let recorded = store.record(new).await.unwrap();
        assert_eq!(recorded.step_count, 2);

        let fetched = store.get("wf_1").await.unwrap();
        assert_eq!(fetched.transfer_ids.len(), 1);
        assert_eq!(fetched.proof_summary["kyc"]["proofId"], "p1");
        assert_eq!(fetched.created_at.timestamp_millis(), recorded.created_at.timestamp_millis());
    }

    #[tokio::test]
    async fn missing_entry_is_not_found() {
        let store = store().await;
        assert!(matches!(store.get("nope").await, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn recent_is_newest_first_and_limited() {
        let store = store().await;
        for i in 0..5 {
            store.record(entry(&format!("wf_{i}"), i)).await.unwrap();
        }
        let recent = store.recent(3).await.unwrap();
        let ids: Vec<_> = recent.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["wf_4", "wf_3", "wf_2"]);
        assert_eq!(recent[0].step_count, 4);
        assert_eq!(store.count().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn failed_runs_keep_their_error() {
        let store = store().await;
        let mut new = entry("wf_f", 0);
        new.status = RunStatus::Failed;
        new.error = Some("timeout".into());
        store.record(new).await.unwrap();

        let v = serde_json::to_value(store.get("wf_f").await.unwrap()).unwrap();
        assert_eq!(v["status"], "failed");
        assert_eq!(v["error"], "timeout");
        assert_eq!(v["stepCount"], 0);
    }

    #[tokio::test]
    async fn steps_must_be_an_array() {
        let store = store().await;
        let mut new = entry("wf_x", 0);
        new.steps = json!({"not": "an array"});
        assert!(matches!(store.record(new).await, Err(StoreError::InvalidArgument(_))));
    }
}

//! Workflow artifacts for the external executor.
//!
//! Each run writes its normalized graph to a uniquely named JSON file in a
//! scratch directory.  The file lives exactly as long as its [`Artifact`]
//! guard, so every exit path of the executor removes it.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;
use crate::workflow::WorkflowGraph;

/// Time-ordered workflow identifier, `wf_<uuid v7>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowId(String);

impl WorkflowId {
    pub fn new() -> Self {
        Self(format!("wf_{}", Uuid::now_v7().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for WorkflowId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Artifact guard
// ---------------------------------------------------------------------------

/// A materialized workflow file.  Dropping the guard deletes the file;
/// deletion errors are ignored.
#[derive(Debug)]
pub struct Artifact {
    path: PathBuf,
}

impl Artifact {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Artifact {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "workflow artifact removed"),
            Err(e) => debug!(path = %self.path.display(), error = %e, "workflow artifact not removed"),
        }
    }
}

/// Writes artifacts into one scratch directory.
#[derive(Debug, Clone)]
pub struct Materializer {
    dir: PathBuf,
}

impl Materializer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path the artifact for `id` would occupy.
    pub fn artifact_path(&self, id: &WorkflowId) -> PathBuf {
        self.dir.join(format!("parsed_workflow_{id}.json"))
    }

    /// Write `graph` as pretty JSON (`description`, `requiresProofs`,
    /// `steps`).  Fails rather than overwrite an existing file.
    pub async fn materialize(&self, graph: &WorkflowGraph, id: &WorkflowId) -> Result<Artifact> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.artifact_path(id);
        let body = serde_json::to_vec_pretty(graph)?;

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        // The guard exists before the write so a failed write still cleans up.
        let artifact = Artifact { path };
        file.write_all(&body).await?;
        file.flush().await?;

        debug!(workflow_id = %id, path = %artifact.path.display(), bytes = body.len(), "workflow materialized");
        Ok(artifact)
    }
}

// ---------------------------------------------------------------------------
// UI step list
// ---------------------------------------------------------------------------

/// Step entry shown by clients while a workflow runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiStep {
    pub id: String,
    pub action: String,
    pub description: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof_type: Option<String>,
}

pub fn ui_steps(graph: &WorkflowGraph) -> Vec<UiStep> {
    graph
        .steps
        .iter()
        .enumerate()
        .map(|(i, step)| {
            let action = step.kind.type_name();
            let proof_type = step
                .kind
                .proof_type()
                .map(str::to_owned)
                .or_else(|| guess_proof_type(&action, &step.description));
            UiStep {
                id: format!("step_{}", i + 1),
                action,
                description: step.description.clone(),
                status: "pending".into(),
                proof_type,
            }
        })
        .collect()
}

fn guess_proof_type(action: &str, description: &str) -> Option<String> {
    let text = format!("{action} {description}").to_lowercase();
    let kind = if text.contains("kyc") {
        "kyc"
    } else if text.contains("location") {
        "location"
    } else if text.split(|c: char| !c.is_alphanumeric()).any(|w| w == "ai") {
        "ai_content"
    } else {
        return None;
    };
    Some(kind.to_owned())
}

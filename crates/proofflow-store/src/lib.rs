//! # proofflow-store
//!
//! Workflow run history in SQLite (WAL mode, versioned migrations).  All
//! queries go through [`Database::execute`] on the blocking pool.
//!
//! ```ignore
//! let db = Database::open_and_migrate("data/proofflow.db").await?;
//! let history = HistoryStore::new(db);
//! let latest = history.recent(20).await?;
//! ```

pub mod db;
pub mod error;
pub mod history;
pub mod migration;

pub use db::Database;
pub use error::{StoreError, StoreResult};
pub use history::{HistoryEntry, HistoryStore, NewHistoryEntry, RunStatus};

//! Shared application state.

use std::sync::Arc;

use proofflow_intent::{Pipeline, TransferStatusPoller};
use proofflow_store::HistoryStore;

/// Shared by every handler behind an `Arc`.
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub poller: Arc<TransferStatusPoller>,
    /// `None` runs without persistence; history then reads as empty.
    pub history: Option<HistoryStore>,
}

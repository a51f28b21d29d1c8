//! Error types for the proofflow-web crate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WebError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] proofflow_store::StoreError),
}

pub type Result<T> = std::result::Result<T, WebError>;

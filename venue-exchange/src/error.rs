//! Domain-specific error types for the exchange side.
//!
//! Mirrors the split `bog-core::core::errors` draws between distinct
//! failure domains, but expressed with `thiserror` instead of hand-rolled
//! `Display` impls, since here the error types cross an async/tonic
//! boundary and need `From` conversions more than they need zero-cost
//! construction.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum TapeError {
    #[error("failed to open deals-flow file {path:?}: {source}")]
    Open {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("csv read error: {0}")]
    Csv(#[from] csv::Error),
}

impl From<StoreError> for tonic::Status {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Database(e) => tonic::Status::internal(e.to_string()),
        }
    }
}

//! Broker-side store error, mirroring `venue_exchange::error::StoreError`'s
//! shape. Transport failures surface as `tonic::Status` directly (see
//! `reconciler::DealProcessor::run`) rather than through a wrapper type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerStoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

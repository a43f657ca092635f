//! The broker side of the toy trading venue: a shadow copy of its
//! clients' orders, the deal-reconciliation pipeline (C7), and the
//! position projector (C8).

pub mod config;
pub mod error;
pub mod reconciler;
pub mod store;
pub mod types;

pub use error::BrokerStoreError;
pub use reconciler::DealProcessor;
pub use store::{BrokerStore, PgBrokerStore};
pub use types::{BrokerDeal, BrokerOrder, IncomingFill, NewBrokerOrder, Position};

//! The exchange side of the toy trading venue: order/deal persistence
//! (C1), the tape reader (C2), the matching engine and candle loop
//! (C3/C5), the subscriber registries (C4), and the gRPC surface (C6).

pub mod config;
pub mod error;
pub mod matching;
pub mod registry;
pub mod rpc;
pub mod store;
pub mod tape;
pub mod types;

pub use error::{StoreError, TapeError};
pub use matching::MatchingEngine;
pub use registry::{CandleRegistry, FillRegistry};
pub use rpc::ExchangeService;
pub use store::{ExchangeStore, PgExchangeStore};
pub use types::{Candle, Deal, NewOrder, Order, Tick};

//! C4: the subscriber registry - candle fan-out and per-broker fill
//! delivery (spec.md §4.4).
//!
//! Two disjoint registries, each guarded by a single `RwLock` as spec.md
//! §5 requires: mutation (subscribe/unsubscribe) takes the write lock,
//! publish takes the read lock and does a non-blocking `try_send` per
//! subscriber. Grounded on the same shape as
//! `original_source/pkg/exchange/deal/usecase/deal.go`'s `Consumers` /
//! `ResultsConsumers` (a `map` + `sync.RWMutex`), translated onto
//! `parking_lot::RwLock` (the teacher's lock of choice throughout
//! `bog-core`) holding `tokio::sync::mpsc::Sender`s instead of raw Go
//! channels.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{trace, warn};
use venue_proto::{Deal, Ohlcv};

pub const SUBSCRIBER_CHANNEL_CAPACITY: usize = 10_000;

/// Opaque handle identifying one candle subscription, used to remove it
/// again on disconnect without the registry having to compare channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
pub struct CandleRegistry {
    next_id: AtomicU64,
    channels: RwLock<HashMap<SubscriptionId, mpsc::Sender<Ohlcv>>>,
}

impl CandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> (SubscriptionId, mpsc::Receiver<Ohlcv>) {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        self.channels.write().insert(id, tx);
        (id, rx)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.channels.write().remove(&id);
    }

    /// Non-blocking fan-out: a full subscriber channel simply misses this
    /// candle (spec.md §4.4, §7 - "never block the matcher"). Order
    /// across subscribers is unspecified; within one subscriber it is
    /// publication order because there is exactly one producer.
    pub fn publish(&self, candle: Ohlcv) {
        let channels = self.channels.read();
        for (id, tx) in channels.iter() {
            match tx.try_send(candle.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    trace!(subscriber = id.0, "candle subscriber channel full, dropping update");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    trace!(subscriber = id.0, "candle subscriber channel closed");
                }
            }
        }
    }

    pub fn active_count(&self) -> usize {
        self.channels.read().len()
    }
}

#[derive(Default)]
pub struct FillRegistry {
    channels: RwLock<HashMap<i64, mpsc::Sender<Deal>>>,
}

impl FillRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A reconnect supersedes the old stream: any previous channel for
    /// this broker is replaced outright (spec.md §4.4).
    pub fn subscribe(&self, broker_id: i64) -> mpsc::Receiver<Deal> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        self.channels.write().insert(broker_id, tx);
        rx
    }

    pub fn unsubscribe(&self, broker_id: i64) {
        self.channels.write().remove(&broker_id);
    }

    /// Delivers `deal` to its owning broker's channel only. If the
    /// broker has no live subscription, or its channel is saturated, the
    /// fill is lost on this path - the documented at-least-once gap
    /// spec.md §9 calls out; recovery on reconnect is the store's job,
    /// not this registry's.
    pub fn publish(&self, broker_id: i64, deal: Deal) -> bool {
        let channels = self.channels.read();
        match channels.get(&broker_id) {
            Some(tx) => match tx.try_send(deal) {
                Ok(()) => true,
                Err(err) => {
                    warn!(broker_id, "fill undelivered: subscriber channel {}", match err {
                        mpsc::error::TrySendError::Full(_) => "full",
                        mpsc::error::TrySendError::Closed(_) => "closed",
                    });
                    false
                }
            },
            None => {
                warn!(broker_id, "fill undelivered: no active Results subscriber");
                false
            }
        }
    }
}

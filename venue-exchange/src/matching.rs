//! C3 + C5: the matching engine and its fused candle tick loop
//! (spec.md §4.3, §4.5).
//!
//! Shaped after `bog-core::engine::generic::Engine::run`'s feed-loop -
//! one dedicated worker selecting between a market-data input and a
//! timer - but expressed with `tokio::select!` over real channels
//! instead of a polled `feed_fn` closure, since here the tape reader
//! (C2) is its own task rather than a shared-memory ring buffer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::registry::{CandleRegistry, FillRegistry};
use crate::store::ExchangeStore;
use crate::types::{Candle, Tick};

/// Drives the matcher. Holds no state itself beyond what §4.3 requires;
/// `candles` and `candle_seq` live on the stack of [`MatchingEngine::run`].
pub struct MatchingEngine {
    store: Arc<dyn ExchangeStore>,
    candle_registry: Arc<CandleRegistry>,
    fill_registry: Arc<FillRegistry>,
    trading_interval: Duration,
}

impl MatchingEngine {
    pub fn new(
        store: Arc<dyn ExchangeStore>,
        candle_registry: Arc<CandleRegistry>,
        fill_registry: Arc<FillRegistry>,
        trading_interval: Duration,
    ) -> Self {
        Self {
            store,
            candle_registry,
            fill_registry,
            trading_interval,
        }
    }

    /// Runs until `ticks` closes. Never returns an error: store failures
    /// during matching are logged and the offending attempt is skipped,
    /// per spec.md §7 ("transient store error ... no automatic retry").
    pub async fn run(&self, mut ticks: tokio::sync::mpsc::Receiver<Tick>) {
        let mut candles: HashMap<String, Candle> = HashMap::new();
        let mut candle_seq: i64 = 0;
        let mut timer = tokio::time::interval(self.trading_interval);
        // The first tick fires immediately; that would flush an empty
        // map on startup, which is harmless but noisy, so we let the
        // default `interval` behavior stand since the empty-map branch
        // below is itself a documented boundary behavior (spec.md §8).

        loop {
            tokio::select! {
                maybe_tick = ticks.recv() => {
                    match maybe_tick {
                        Some(tick) => self.on_tick(&mut candles, &mut candle_seq, tick).await,
                        None => {
                            debug!("tape channel closed, matching engine stopping");
                            break;
                        }
                    }
                }
                _ = timer.tick() => {
                    self.flush_candles(&mut candles);
                }
            }
        }
    }

    #[instrument(skip(self, candles, candle_seq, tick), fields(ticker = %tick.ticker))]
    async fn on_tick(&self, candles: &mut HashMap<String, Candle>, candle_seq: &mut i64, tick: Tick) {
        let now = chrono::Utc::now().timestamp();
        let candle = candles.entry(tick.ticker.clone()).or_insert_with(|| {
            *candle_seq += 1;
            Candle::open_from(*candle_seq, tick.ticker.clone(), self.trading_interval.as_secs() as i32, now, tick.price)
        });
        candle.absorb(tick.price, tick.volume);

        let eligible = match self.store.orders_eligible(&tick.ticker, tick.price).await {
            Ok(orders) => orders,
            Err(e) => {
                warn!(error = %e, "orders_eligible failed, skipping tick's matching step");
                return;
            }
        };

        let mut remaining = tick.volume;
        for order in eligible {
            if remaining == 0 {
                break;
            }
            let close_volume = remaining.min(order.remaining());
            match self.store.make_deal(&order, close_volume).await {
                Ok(deal) => {
                    remaining -= close_volume;
                    debug!(order_id = order.order_id, close_volume, "deal produced");
                    let _ = self.fill_registry.publish(deal.broker_id as i64, deal.into());
                }
                Err(e) => {
                    warn!(order_id = order.order_id, error = %e, "make_deal failed, order skipped");
                }
            }
        }
    }

    fn flush_candles(&self, candles: &mut HashMap<String, Candle>) {
        if candles.is_empty() {
            return;
        }
        for (_, candle) in candles.drain() {
            self.candle_registry.publish(candle.into());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryExchangeStore;
    use crate::types::NewOrder;
    use proptest::prelude::*;
    use tokio::sync::mpsc;
    use venue_proto::Side;

    fn new_order(broker_id: i32, ticker: &str, volume: i32, price: f64, submit_time: i64) -> NewOrder {
        NewOrder {
            broker_id,
            client_id: 1,
            ticker: ticker.to_string(),
            requested_volume: volume,
            submit_time,
            limit_price: price,
            side: Side::Buy,
        }
    }

    async fn engine_with_store() -> (MatchingEngine, Arc<InMemoryExchangeStore>) {
        let store = Arc::new(InMemoryExchangeStore::new());
        let candle_registry = Arc::new(CandleRegistry::new());
        let fill_registry = Arc::new(FillRegistry::new());
        let engine = MatchingEngine::new(
            store.clone(),
            candle_registry,
            fill_registry,
            Duration::from_secs(1),
        );
        (engine, store)
    }

    /// Scenario 1 (spec.md §8): a tick exactly partially fills a single order.
    #[tokio::test]
    async fn tick_partially_fills_sole_order() {
        let (engine, store) = engine_with_store().await;
        store.add_order(new_order(1, "A", 10, 100.0, 1)).await.unwrap();

        let mut candles = HashMap::new();
        let mut seq = 0;
        engine
            .on_tick(&mut candles, &mut seq, Tick { ticker: "A".into(), price: 100.0, volume: 4 })
            .await;

        let deals = store.deals();
        assert_eq!(deals.len(), 1);
        assert_eq!(deals[0].volume, 4);
        assert!(deals[0].partial);

        let orders = store.orders();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].completed_volume, 4);

        let candle = candles.get("A").unwrap();
        assert_eq!(candle.open, 100.0);
        assert_eq!(candle.volume, 4);
    }

    /// Scenario 2: a second tick fully closes the order, discarding residual volume.
    #[tokio::test]
    async fn tick_fully_fills_and_discards_residual() {
        let (engine, store) = engine_with_store().await;
        store.add_order(new_order(1, "A", 10, 100.0, 1)).await.unwrap();

        let mut candles = HashMap::new();
        let mut seq = 0;
        engine
            .on_tick(&mut candles, &mut seq, Tick { ticker: "A".into(), price: 100.0, volume: 4 })
            .await;
        engine
            .on_tick(&mut candles, &mut seq, Tick { ticker: "A".into(), price: 100.0, volume: 8 })
            .await;

        let deals = store.deals();
        assert_eq!(deals.len(), 2);
        assert_eq!(deals[1].volume, 6);
        assert!(!deals[1].partial);
        assert!(store.orders().is_empty());
    }

    /// Scenario 3: time priority across two orders at the same price.
    #[tokio::test]
    async fn time_priority_across_two_orders() {
        let (engine, store) = engine_with_store().await;
        store.add_order(new_order(1, "A", 5, 50.0, 10)).await.unwrap();
        store.add_order(new_order(1, "A", 5, 50.0, 20)).await.unwrap();

        let mut candles = HashMap::new();
        let mut seq = 0;
        engine
            .on_tick(&mut candles, &mut seq, Tick { ticker: "A".into(), price: 50.0, volume: 7 })
            .await;

        let deals = store.deals();
        assert_eq!(deals.len(), 2);
        assert_eq!(deals[0].order_id, 1);
        assert_eq!(deals[0].volume, 5);
        assert!(!deals[0].partial);
        assert_eq!(deals[1].order_id, 2);
        assert_eq!(deals[1].volume, 2);
        assert!(deals[1].partial);
    }

    /// Boundary: no eligible orders still updates the candle, produces no deals.
    #[tokio::test]
    async fn tick_with_no_eligible_orders_only_updates_candle() {
        let (engine, store) = engine_with_store().await;

        let mut candles = HashMap::new();
        let mut seq = 0;
        engine
            .on_tick(&mut candles, &mut seq, Tick { ticker: "A".into(), price: 100.0, volume: 4 })
            .await;

        assert!(store.deals().is_empty());
        assert_eq!(candles.get("A").unwrap().volume, 4);
    }

    /// Boundary: timer firing on an empty candle map publishes nothing.
    #[tokio::test]
    async fn empty_candle_map_flush_is_a_noop() {
        let (engine, _store) = engine_with_store().await;
        let mut candles: HashMap<String, Candle> = HashMap::new();
        engine.flush_candles(&mut candles);
        assert!(candles.is_empty());
    }

    /// Full run loop: a tick on the channel drives a fill through to the
    /// correct broker's fill subscription.
    #[tokio::test]
    async fn run_loop_delivers_fill_to_subscribed_broker() {
        let store = Arc::new(InMemoryExchangeStore::new());
        store.add_order(new_order(7, "A", 10, 100.0, 1)).await.unwrap();
        let candle_registry = Arc::new(CandleRegistry::new());
        let fill_registry = Arc::new(FillRegistry::new());
        let mut fill_rx = fill_registry.subscribe(7);

        let engine = MatchingEngine::new(
            store.clone(),
            candle_registry,
            fill_registry,
            Duration::from_secs(3600),
        );

        let (tx, rx) = mpsc::channel(10);
        tx.send(Tick { ticker: "A".into(), price: 100.0, volume: 4 }).await.unwrap();
        drop(tx);

        engine.run(rx).await;

        let fill = fill_rx.try_recv().expect("fill should have been published");
        assert_eq!(fill.volume, 4);
    }

    /// Invariants 1-4 (spec.md §8): order volume bounds, per-order fill
    /// bounds, per-tick fill bounds, and time priority, checked across
    /// randomized order books and tick sequences rather than one literal
    /// scenario each.
    #[test]
    fn invariants_hold_across_random_order_and_tick_sequences() {
        proptest!(|(
            order_volumes in proptest::collection::vec(1i32..50, 1..5),
            order_times in proptest::collection::vec(0i64..1000, 1..5),
            tick_volumes in proptest::collection::vec(0i32..100, 1..5),
        )| {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let (orders_after, id_to_requested, id_to_time, per_tick_fills) = rt.block_on(async {
                let store = Arc::new(InMemoryExchangeStore::new());
                let candle_registry = Arc::new(CandleRegistry::new());
                let fill_registry = Arc::new(FillRegistry::new());
                let engine = MatchingEngine::new(
                    store.clone(),
                    candle_registry,
                    fill_registry,
                    Duration::from_secs(1),
                );

                let n = order_volumes.len().min(order_times.len());
                let mut id_to_requested = HashMap::new();
                let mut id_to_time = HashMap::new();
                for i in 0..n {
                    let id = store
                        .add_order(new_order(1, "A", order_volumes[i], 100.0, order_times[i]))
                        .await
                        .unwrap();
                    id_to_requested.insert(id, order_volumes[i]);
                    id_to_time.insert(id, order_times[i]);
                }

                let mut candles = HashMap::new();
                let mut seq = 0;
                let mut per_tick_fills = Vec::new();
                for tick_volume in &tick_volumes {
                    let before = store.deals().len();
                    engine
                        .on_tick(&mut candles, &mut seq, Tick { ticker: "A".into(), price: 100.0, volume: *tick_volume })
                        .await;
                    let deals = store.deals();
                    per_tick_fills.push((*tick_volume, deals[before..].to_vec()));
                }

                (store.orders(), id_to_requested, id_to_time, per_tick_fills)
            });

            // Invariant 1: every surviving order stays within its bounds.
            for order in &orders_after {
                prop_assert!(order.completed_volume >= 0 && order.completed_volume <= order.requested_volume);
            }

            // Invariant 2: an order's total filled volume never exceeds what it asked for.
            for (&id, &requested) in &id_to_requested {
                let filled: i32 = per_tick_fills
                    .iter()
                    .flat_map(|(_, fills)| fills)
                    .filter(|d| d.order_id == id)
                    .map(|d| d.volume)
                    .sum();
                prop_assert!(filled <= requested);
            }

            // Invariant 3: one tick's fills never exceed that tick's volume.
            for (tick_volume, fills) in &per_tick_fills {
                let total: i32 = fills.iter().map(|d| d.volume).sum();
                prop_assert!(total <= *tick_volume);
            }

            // Invariant 4: within one tick, fills are produced in ascending
            // (submit_time, order_id) priority order.
            for (_, fills) in &per_tick_fills {
                let mut last_key: Option<(i64, i64)> = None;
                for deal in fills {
                    let key = (*id_to_time.get(&deal.order_id).unwrap(), deal.order_id);
                    if let Some(last) = last_key {
                        prop_assert!(last <= key);
                    }
                    last_key = Some(key);
                }
            }
        });
    }
}

//! Exchange-side domain types: resting orders, fills, and OHLCV candles.
//!
//! Mirrors the fields spec.md §3 assigns to `orders` and `deals`, plus
//! the in-memory-only candle. Prices are `f64` internally and narrowed
//! to `f32` only when crossing into `venue_proto::Deal`/`Ohlcv`.

use venue_proto::Side;

/// A resting limit order on the exchange book.
///
/// Invariant: `0 <= completed_volume <= requested_volume`. Once
/// `completed_volume == requested_volume` the row no longer exists -
/// there is no "filled" state to represent, so this struct is never
/// constructed in that condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub order_id: i64,
    pub broker_id: i32,
    pub client_id: i32,
    pub ticker: String,
    pub requested_volume: i32,
    pub completed_volume: i32,
    pub submit_time: i64,
    pub limit_price: f64,
    pub side: Side,
}

impl Order {
    /// Volume still resting and eligible to match.
    pub fn remaining(&self) -> i32 {
        self.requested_volume - self.completed_volume
    }

    /// The `(ticker, side, limit_price, submit_time, order_id)` priority
    /// key spec.md §3 declares unique and matching-priority-defining.
    pub fn priority_key(&self) -> (i64, i64) {
        (self.submit_time, self.order_id)
    }
}

/// A new order intent not yet assigned an exchange id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub broker_id: i32,
    pub client_id: i32,
    pub ticker: String,
    pub requested_volume: i32,
    pub submit_time: i64,
    pub limit_price: f64,
    pub side: Side,
}

/// One execution event produced by closing (part of) an order.
#[derive(Debug, Clone, PartialEq)]
pub struct Deal {
    pub deal_id: i64,
    pub order_id: i64,
    pub broker_id: i32,
    pub client_id: i32,
    pub ticker: String,
    pub volume: i32,
    /// Did the originating order survive with remaining volume?
    pub partial: bool,
    pub exec_time: i64,
    pub price: f64,
    pub side: Side,
    pub shipped_at: Option<i64>,
}

/// One exogenous tape tick driving the matcher.
#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    pub ticker: String,
    pub price: f64,
    pub volume: i32,
}

/// In-memory, per-interval OHLCV accumulator. Never persisted on the
/// exchange side - it is discarded the instant it is published.
#[derive(Debug, Clone, PartialEq)]
pub struct Candle {
    pub candle_id: i64,
    pub ticker: String,
    pub interval_seconds: i32,
    pub window_start: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i32,
}

impl Candle {
    /// Start a fresh accumulator from the tick that opened this window.
    pub fn open_from(candle_id: i64, ticker: String, interval_seconds: i32, now: i64, price: f64) -> Self {
        Self {
            candle_id,
            ticker,
            interval_seconds,
            window_start: now,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 0,
        }
    }

    /// Fold one tick into the accumulator (spec.md §4.3 step 1).
    pub fn absorb(&mut self, price: f64, volume: i32) {
        self.close = price;
        self.volume += volume;
        if price < self.low {
            self.low = price;
        }
        if price > self.high {
            self.high = price;
        }
    }
}

impl From<Deal> for venue_proto::Deal {
    fn from(d: Deal) -> Self {
        venue_proto::Deal {
            id: d.deal_id,
            broker_id: d.broker_id,
            client_id: d.client_id,
            order_id: d.order_id,
            ticker: d.ticker,
            volume: d.volume,
            partial: d.partial,
            time: d.exec_time as i32,
            price: d.price as f32,
            r#type: d.side.as_wire().to_string(),
        }
    }
}

impl From<Candle> for venue_proto::Ohlcv {
    fn from(c: Candle) -> Self {
        venue_proto::Ohlcv {
            id: c.candle_id,
            time: c.window_start as i32,
            interval: c.interval_seconds,
            open: c.open as f32,
            high: c.high as f32,
            low: c.low as f32,
            close: c.close as f32,
            volume: c.volume,
            ticker: c.ticker,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(id: i64, submit_time: i64, requested: i32, completed: i32) -> Order {
        Order {
            order_id: id,
            broker_id: 1,
            client_id: 1,
            ticker: "A".into(),
            requested_volume: requested,
            completed_volume: completed,
            submit_time,
            limit_price: 100.0,
            side: Side::Buy,
        }
    }

    #[test]
    fn remaining_is_requested_minus_completed() {
        let o = order(1, 10, 10, 4);
        assert_eq!(o.remaining(), 6);
    }

    #[test]
    fn priority_key_orders_by_submit_time_then_id() {
        let earlier = order(2, 10, 5, 0);
        let later = order(1, 20, 5, 0);
        assert!(earlier.priority_key() < later.priority_key());
    }

    #[test]
    fn candle_absorbs_ticks_and_tracks_extremes() {
        let mut c = Candle::open_from(1, "A".into(), 1, 1000, 100.0);
        c.absorb(105.0, 4);
        c.absorb(95.0, 2);
        assert_eq!(c.open, 100.0);
        assert_eq!(c.close, 95.0);
        assert_eq!(c.high, 105.0);
        assert_eq!(c.low, 95.0);
        assert_eq!(c.volume, 6);
    }
}

//! C1: the order/deal store - persistence and the atomic match-and-record
//! operation described in spec.md §4.1.
//!
//! Schema and queries follow `original_source/pkg/exchange/deal/repo/pg.go`
//! (`orders`/`deals` tables, the `(ticker, type, price, time, id)` unique
//! index used as the matching priority order) translated onto `sqlx`,
//! the only teacher-pack crate with a real Postgres layer
//! (`examples/YuriAllexei-polypolypoly/libs/market-db`).

use std::str::FromStr;

use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};
use venue_proto::Side;

use crate::error::StoreError;
use crate::types::{Deal, NewOrder, Order};

/// The operations the matching engine (C3) and RPC surface (C6) need
/// from the order/deal store (spec.md §4.1). Abstracted behind a trait,
/// in the same spirit as `bog-core::engine::traits::Executor`, so the
/// matcher can be driven in tests by an in-memory fake instead of a live
/// Postgres instance.
#[async_trait::async_trait]
pub trait ExchangeStore: Send + Sync {
    async fn add_order(&self, order: NewOrder) -> Result<i64, StoreError>;
    async fn delete_order(&self, order_id: i64) -> Result<(), StoreError>;
    async fn orders_eligible(&self, ticker: &str, price: f64) -> Result<Vec<Order>, StoreError>;
    async fn make_deal(&self, order: &Order, close_volume: i32) -> Result<Deal, StoreError>;
    async fn mark_deal_shipped(&self, deal_id: i64) -> Result<(), StoreError>;
}

#[derive(Clone)]
pub struct PgExchangeStore {
    pool: PgPool,
}

impl PgExchangeStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Construct directly from an existing pool (used by tests and by
    /// callers that already manage their own connection lifecycle).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS orders (
                id BIGSERIAL PRIMARY KEY,
                broker_id INT NOT NULL,
                client_id INT NOT NULL,
                ticker VARCHAR(200) NOT NULL,
                volume INT NOT NULL,
                completed_volume INT NOT NULL,
                submit_time BIGINT NOT NULL,
                price DOUBLE PRECISION NOT NULL,
                side VARCHAR(10) NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS orders_priority_idx \
             ON orders (ticker, side, price, submit_time, id);",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS deals (
                id BIGSERIAL PRIMARY KEY,
                order_id BIGINT NOT NULL,
                broker_id INT NOT NULL,
                client_id INT NOT NULL,
                ticker VARCHAR(200) NOT NULL,
                volume INT NOT NULL,
                partial BOOLEAN NOT NULL,
                exec_time BIGINT NOT NULL,
                price DOUBLE PRECISION NOT NULL,
                side VARCHAR(10) NOT NULL,
                shipped_at BIGINT
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl ExchangeStore for PgExchangeStore {
    #[instrument(skip(self))]
    async fn add_order(&self, order: NewOrder) -> Result<i64, StoreError> {
        let row = sqlx::query(
            "INSERT INTO orders (broker_id, client_id, ticker, volume, completed_volume, \
             submit_time, price, side) VALUES ($1, $2, $3, $4, 0, $5, $6, $7) RETURNING id",
        )
        .bind(order.broker_id)
        .bind(order.client_id)
        .bind(&order.ticker)
        .bind(order.requested_volume)
        .bind(order.submit_time)
        .bind(order.limit_price)
        .bind(order.side.as_wire())
        .fetch_one(&self.pool)
        .await?;

        let order_id: i64 = row.try_get("id")?;
        debug!(order_id, "order persisted");
        Ok(order_id)
    }

    #[instrument(skip(self))]
    async fn delete_order(&self, order_id: i64) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM orders WHERE id = $1")
            .bind(order_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Resting orders at exactly `price` for `ticker`, oldest first then
    /// smallest id - the price-time priority queue spec.md §4.1 and §4.3
    /// define. Remaining volume, not requested volume, is returned.
    #[instrument(skip(self))]
    async fn orders_eligible(&self, ticker: &str, price: f64) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, broker_id, client_id, ticker, volume, completed_volume, \
             submit_time, price, side FROM orders \
             WHERE ticker = $1 AND price = $2 \
             ORDER BY submit_time ASC, id ASC",
        )
        .bind(ticker)
        .bind(price)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let side_str: String = row.try_get("side")?;
                Ok(Order {
                    order_id: row.try_get("id")?,
                    broker_id: row.try_get("broker_id")?,
                    client_id: row.try_get("client_id")?,
                    ticker: row.try_get("ticker")?,
                    requested_volume: row.try_get("volume")?,
                    completed_volume: row.try_get("completed_volume")?,
                    submit_time: row.try_get("submit_time")?,
                    limit_price: row.try_get("price")?,
                    side: Side::from_str(&side_str)
                        .map_err(|_| sqlx::Error::Decode("invalid side".into()))?,
                })
            })
            .collect()
    }

    /// Atomic match-and-record: update-or-delete the order, insert the
    /// deal, in one transaction. Rolls back entirely on any failure, so
    /// a failed attempt never leaves partial state visible (spec.md §7).
    #[instrument(skip(self, order))]
    async fn make_deal(&self, order: &Order, close_volume: i32) -> Result<Deal, StoreError> {
        let mut tx = self.pool.begin().await?;

        let partial = close_volume < order.remaining();
        if partial {
            let new_completed = order.completed_volume + close_volume;
            sqlx::query("UPDATE orders SET completed_volume = $1 WHERE id = $2")
                .bind(new_completed)
                .bind(order.order_id)
                .execute(&mut *tx)
                .await?;
        } else {
            sqlx::query("DELETE FROM orders WHERE id = $1")
                .bind(order.order_id)
                .execute(&mut *tx)
                .await?;
        }

        let row = sqlx::query(
            "INSERT INTO deals (order_id, broker_id, client_id, ticker, volume, partial, \
             exec_time, price, side, shipped_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NULL) RETURNING id, exec_time",
        )
        .bind(order.order_id)
        .bind(order.broker_id)
        .bind(order.client_id)
        .bind(&order.ticker)
        .bind(close_volume)
        .bind(partial)
        .bind(chrono::Utc::now().timestamp())
        .bind(order.limit_price)
        .bind(order.side.as_wire())
        .fetch_one(&mut *tx)
        .await?;

        let deal_id: i64 = row.try_get("id")?;
        let exec_time: i64 = row.try_get("exec_time")?;

        tx.commit().await?;

        debug!(deal_id, order_id = order.order_id, close_volume, partial, "deal recorded");

        Ok(Deal {
            deal_id,
            order_id: order.order_id,
            broker_id: order.broker_id,
            client_id: order.client_id,
            ticker: order.ticker.clone(),
            volume: close_volume,
            partial,
            exec_time,
            price: order.limit_price,
            side: order.side,
            shipped_at: None,
        })
    }

    #[instrument(skip(self))]
    async fn mark_deal_shipped(&self, deal_id: i64) -> Result<(), StoreError> {
        sqlx::query("UPDATE deals SET shipped_at = $1 WHERE id = $2")
            .bind(chrono::Utc::now().timestamp())
            .bind(deal_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// An in-memory `ExchangeStore`, used to drive the matching engine in
/// tests without a live Postgres instance. Mirrors the same
/// update-or-delete-then-record semantics as `PgExchangeStore::make_deal`,
/// guarded by a `parking_lot::Mutex` instead of a transaction.
#[cfg(any(test, feature = "test-support"))]
pub mod memory {
    use std::sync::atomic::{AtomicI64, Ordering};

    use parking_lot::Mutex;

    use super::*;

    #[derive(Default)]
    struct Inner {
        orders: Vec<Order>,
        deals: Vec<Deal>,
    }

    pub struct InMemoryExchangeStore {
        next_order_id: AtomicI64,
        next_deal_id: AtomicI64,
        inner: Mutex<Inner>,
    }

    impl Default for InMemoryExchangeStore {
        fn default() -> Self {
            Self {
                next_order_id: AtomicI64::new(1),
                next_deal_id: AtomicI64::new(1),
                inner: Mutex::new(Inner::default()),
            }
        }
    }

    impl InMemoryExchangeStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn deals(&self) -> Vec<Deal> {
            self.inner.lock().deals.clone()
        }

        pub fn orders(&self) -> Vec<Order> {
            self.inner.lock().orders.clone()
        }
    }

    #[async_trait::async_trait]
    impl ExchangeStore for InMemoryExchangeStore {
        async fn add_order(&self, order: NewOrder) -> Result<i64, StoreError> {
            let order_id = self.next_order_id.fetch_add(1, Ordering::Relaxed);
            self.inner.lock().orders.push(Order {
                order_id,
                broker_id: order.broker_id,
                client_id: order.client_id,
                ticker: order.ticker,
                requested_volume: order.requested_volume,
                completed_volume: 0,
                submit_time: order.submit_time,
                limit_price: order.limit_price,
                side: order.side,
            });
            Ok(order_id)
        }

        async fn delete_order(&self, order_id: i64) -> Result<(), StoreError> {
            self.inner.lock().orders.retain(|o| o.order_id != order_id);
            Ok(())
        }

        async fn orders_eligible(&self, ticker: &str, price: f64) -> Result<Vec<Order>, StoreError> {
            let mut eligible: Vec<Order> = self
                .inner
                .lock()
                .orders
                .iter()
                .filter(|o| o.ticker == ticker && o.limit_price == price)
                .cloned()
                .collect();
            eligible.sort_by_key(|o| o.priority_key());
            Ok(eligible)
        }

        async fn make_deal(&self, order: &Order, close_volume: i32) -> Result<Deal, StoreError> {
            let deal_id = self.next_deal_id.fetch_add(1, Ordering::Relaxed);
            let partial = close_volume < order.remaining();

            let mut inner = self.inner.lock();
            if partial {
                if let Some(stored) = inner.orders.iter_mut().find(|o| o.order_id == order.order_id) {
                    stored.completed_volume += close_volume;
                }
            } else {
                inner.orders.retain(|o| o.order_id != order.order_id);
            }

            let deal = Deal {
                deal_id,
                order_id: order.order_id,
                broker_id: order.broker_id,
                client_id: order.client_id,
                ticker: order.ticker.clone(),
                volume: close_volume,
                partial,
                exec_time: 0,
                price: order.limit_price,
                side: order.side,
                shipped_at: None,
            };
            inner.deals.push(deal.clone());
            Ok(deal)
        }

        async fn mark_deal_shipped(&self, deal_id: i64) -> Result<(), StoreError> {
            let mut inner = self.inner.lock();
            if let Some(deal) = inner.deals.iter_mut().find(|d| d.deal_id == deal_id) {
                deal.shipped_at = Some(0);
            }
            Ok(())
        }
    }
}

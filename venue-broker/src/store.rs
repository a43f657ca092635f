//! Broker-side persistence (spec.md §4.1 broker operations, §4.7 C7,
//! §4.8 C8). The reconciliation transaction (insert fill, update-or-
//! delete the local order, recompute the position) is bundled into a
//! single `reconcile_fill` operation so it can be abstracted behind a
//! trait the same way `venue_exchange::store::ExchangeStore` is:
//! production code runs it against Postgres, tests run it in memory.

use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::str::FromStr;
use tracing::{debug, instrument};
use venue_proto::Side;

use crate::error::BrokerStoreError;
use crate::types::{BrokerOrder, IncomingFill, NewBrokerOrder, Position};

#[async_trait::async_trait]
pub trait BrokerStore: Send + Sync {
    async fn add_order(&self, order: NewBrokerOrder) -> Result<i64, BrokerStoreError>;
    async fn mark_shipped(&self, order_id: i64, exchange_order_id: i64) -> Result<(), BrokerStoreError>;
    async fn orders_by_client(&self, client_id: i32) -> Result<Vec<BrokerOrder>, BrokerStoreError>;

    /// Runs steps 1-6 of spec.md §4.7 atomically. Returns the recomputed
    /// position. Re-delivering a fill with an `exchange_deal_id` already
    /// on the ledger is a no-op on the ledger insert but still recomputes
    /// the position (making the whole operation idempotent, per invariant 5).
    async fn reconcile_fill(&self, fill: IncomingFill) -> Result<Position, BrokerStoreError>;
}

#[derive(Clone)]
pub struct PgBrokerStore {
    pool: PgPool,
}

impl PgBrokerStore {
    pub async fn connect(database_url: &str) -> Result<Self, BrokerStoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn init_schema(&self) -> Result<(), BrokerStoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS orders (
                id BIGSERIAL PRIMARY KEY,
                exchange_order_id BIGINT,
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
            r#"
            CREATE TABLE IF NOT EXISTS deals (
                id BIGSERIAL PRIMARY KEY,
                exchange_deal_id BIGINT NOT NULL UNIQUE,
                exchange_order_id BIGINT NOT NULL,
                broker_id INT NOT NULL,
                client_id INT NOT NULL,
                ticker VARCHAR(200) NOT NULL,
                volume INT NOT NULL,
                partial BOOLEAN NOT NULL,
                exec_time BIGINT NOT NULL,
                price DOUBLE PRECISION NOT NULL,
                side VARCHAR(10) NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS clients (
                id INT PRIMARY KEY,
                name VARCHAR(200) NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS positions (
                client_id INT NOT NULL,
                ticker VARCHAR(200) NOT NULL,
                net_volume BIGINT NOT NULL,
                gross_total DOUBLE PRECISION NOT NULL,
                avg_price DOUBLE PRECISION NOT NULL,
                PRIMARY KEY (client_id, ticker)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl BrokerStore for PgBrokerStore {
    #[instrument(skip(self))]
    async fn add_order(&self, order: NewBrokerOrder) -> Result<i64, BrokerStoreError> {
        let row = sqlx::query(
            "INSERT INTO orders (exchange_order_id, broker_id, client_id, ticker, volume, \
             completed_volume, submit_time, price, side) \
             VALUES (NULL, $1, $2, $3, $4, 0, $5, $6, $7) RETURNING id",
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
        Ok(order_id)
    }

    #[instrument(skip(self))]
    async fn mark_shipped(&self, order_id: i64, exchange_order_id: i64) -> Result<(), BrokerStoreError> {
        sqlx::query("UPDATE orders SET exchange_order_id = $1 WHERE id = $2")
            .bind(exchange_order_id)
            .bind(order_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn orders_by_client(&self, client_id: i32) -> Result<Vec<BrokerOrder>, BrokerStoreError> {
        let rows = sqlx::query(
            "SELECT id, exchange_order_id, broker_id, client_id, ticker, volume, \
             completed_volume, submit_time, price, side FROM orders WHERE client_id = $1",
        )
        .bind(client_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let side_str: String = row.try_get("side")?;
                Ok(BrokerOrder {
                    order_id: row.try_get("id")?,
                    exchange_order_id: row.try_get("exchange_order_id")?,
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

    #[instrument(skip(self, fill), fields(exchange_deal_id = fill.exchange_deal_id))]
    async fn reconcile_fill(&self, fill: IncomingFill) -> Result<Position, BrokerStoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO deals (exchange_deal_id, exchange_order_id, broker_id, client_id, \
             ticker, volume, partial, exec_time, price, side) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT (exchange_deal_id) DO NOTHING",
        )
        .bind(fill.exchange_deal_id)
        .bind(fill.exchange_order_id)
        .bind(fill.broker_id)
        .bind(fill.client_id)
        .bind(&fill.ticker)
        .bind(fill.volume)
        .bind(fill.partial)
        .bind(fill.exec_time)
        .bind(fill.price)
        .bind(fill.side.as_wire())
        .execute(&mut *tx)
        .await?;

        let local_order_id: Option<i64> =
            sqlx::query("SELECT id FROM orders WHERE exchange_order_id = $1")
                .bind(fill.exchange_order_id)
                .fetch_optional(&mut *tx)
                .await?
                .map(|row| row.try_get("id"))
                .transpose()?;

        if let Some(order_id) = local_order_id {
            if fill.partial {
                let closed_volume: i64 = sqlx::query(
                    "SELECT COALESCE(SUM(volume), 0) AS total FROM deals WHERE exchange_order_id = $1",
                )
                .bind(fill.exchange_order_id)
                .fetch_one(&mut *tx)
                .await?
                .try_get("total")?;

                sqlx::query("UPDATE orders SET completed_volume = $1 WHERE id = $2")
                    .bind(closed_volume as i32)
                    .bind(order_id)
                    .execute(&mut *tx)
                    .await?;
            } else {
                sqlx::query("DELETE FROM orders WHERE id = $1")
                    .bind(order_id)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        let row = sqlx::query(
            "SELECT \
             COALESCE(SUM(CASE WHEN side = 'buy' THEN volume ELSE -volume END), 0) AS net_volume, \
             COALESCE(SUM(CASE WHEN side = 'buy' THEN volume * price ELSE -volume * price END), 0.0) AS gross_total, \
             COALESCE(AVG(price), 0.0) AS avg_price \
             FROM deals WHERE client_id = $1 AND ticker = $2",
        )
        .bind(fill.client_id)
        .bind(&fill.ticker)
        .fetch_one(&mut *tx)
        .await?;

        let net_volume: i64 = row.try_get("net_volume")?;
        let gross_total: f64 = row.try_get("gross_total")?;
        let avg_price: f64 = row.try_get("avg_price")?;

        sqlx::query(
            "INSERT INTO positions (client_id, ticker, net_volume, gross_total, avg_price) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (client_id, ticker) DO UPDATE SET \
             net_volume = EXCLUDED.net_volume, gross_total = EXCLUDED.gross_total, avg_price = EXCLUDED.avg_price",
        )
        .bind(fill.client_id)
        .bind(&fill.ticker)
        .bind(net_volume)
        .bind(gross_total)
        .bind(avg_price)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(net_volume, gross_total, avg_price, "position recomputed");

        Ok(Position {
            net_volume,
            gross_total,
            avg_price,
        })
    }
}

/// An in-memory `BrokerStore`, used to exercise the reconciler (C7) and
/// position projector (C8) in tests without a live Postgres instance.
#[cfg(any(test, feature = "test-support"))]
pub mod memory {
    use std::sync::atomic::{AtomicI64, Ordering};

    use parking_lot::Mutex;

    use crate::types::BrokerDeal;

    use super::*;

    #[derive(Default)]
    struct Inner {
        orders: Vec<BrokerOrder>,
        deals: Vec<BrokerDeal>,
    }

    pub struct InMemoryBrokerStore {
        next_order_id: AtomicI64,
        next_deal_id: AtomicI64,
        inner: Mutex<Inner>,
    }

    impl Default for InMemoryBrokerStore {
        fn default() -> Self {
            Self {
                next_order_id: AtomicI64::new(1),
                next_deal_id: AtomicI64::new(1),
                inner: Mutex::new(Inner::default()),
            }
        }
    }

    impl InMemoryBrokerStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn deals(&self) -> Vec<BrokerDeal> {
            self.inner.lock().deals.clone()
        }

        pub fn orders(&self) -> Vec<BrokerOrder> {
            self.inner.lock().orders.clone()
        }

        /// Seeds a local order already ACKed by the exchange, the
        /// starting state a fill's reconciliation expects to find.
        pub fn seed_order(&self, order: BrokerOrder) {
            self.inner.lock().orders.push(order);
        }
    }

    #[async_trait::async_trait]
    impl BrokerStore for InMemoryBrokerStore {
        async fn add_order(&self, order: NewBrokerOrder) -> Result<i64, BrokerStoreError> {
            let order_id = self.next_order_id.fetch_add(1, Ordering::Relaxed);
            self.inner.lock().orders.push(BrokerOrder {
                order_id,
                exchange_order_id: None,
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

        async fn mark_shipped(&self, order_id: i64, exchange_order_id: i64) -> Result<(), BrokerStoreError> {
            let mut inner = self.inner.lock();
            if let Some(order) = inner.orders.iter_mut().find(|o| o.order_id == order_id) {
                order.exchange_order_id = Some(exchange_order_id);
            }
            Ok(())
        }

        async fn orders_by_client(&self, client_id: i32) -> Result<Vec<BrokerOrder>, BrokerStoreError> {
            Ok(self
                .inner
                .lock()
                .orders
                .iter()
                .filter(|o| o.client_id == client_id)
                .cloned()
                .collect())
        }

        async fn reconcile_fill(&self, fill: IncomingFill) -> Result<Position, BrokerStoreError> {
            let mut inner = self.inner.lock();

            let already_seen = inner
                .deals
                .iter()
                .any(|d| d.exchange_deal_id == fill.exchange_deal_id);
            if !already_seen {
                let deal_id = self.next_deal_id.fetch_add(1, Ordering::Relaxed);
                inner.deals.push(BrokerDeal {
                    deal_id,
                    exchange_deal_id: fill.exchange_deal_id,
                    exchange_order_id: fill.exchange_order_id,
                    broker_id: fill.broker_id,
                    client_id: fill.client_id,
                    ticker: fill.ticker.clone(),
                    volume: fill.volume,
                    partial: fill.partial,
                    exec_time: fill.exec_time,
                    price: fill.price,
                    side: fill.side,
                });
            }

            let local_order_id = inner
                .orders
                .iter()
                .find(|o| o.exchange_order_id == Some(fill.exchange_order_id))
                .map(|o| o.order_id);

            if let Some(order_id) = local_order_id {
                if fill.partial {
                    let closed_volume: i32 = inner
                        .deals
                        .iter()
                        .filter(|d| d.exchange_order_id == fill.exchange_order_id)
                        .map(|d| d.volume)
                        .sum();
                    if let Some(order) = inner.orders.iter_mut().find(|o| o.order_id == order_id) {
                        order.completed_volume = closed_volume;
                    }
                } else {
                    inner.orders.retain(|o| o.order_id != order_id);
                }
            }

            let matching: Vec<BrokerDeal> = inner
                .deals
                .iter()
                .filter(|d| d.client_id == fill.client_id && d.ticker == fill.ticker)
                .cloned()
                .collect();

            Ok(Position::recompute(&matching))
        }
    }
}

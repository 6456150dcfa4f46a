use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{PgConnection, Postgres, Row, Transaction};
use std::time::Duration;
use uuid::Uuid;

use super::{LockedBatch, OrderStore, OrderTransaction, StoreError};
use crate::domain::order::{Order, OrderStatus, ProductItem};
use crate::outbox::OutboxRecord;

// ============================================================================
// PostgreSQL Order Store
// ============================================================================
//
// Optimistic locking: UPDATE ... WHERE version = $expected. A concurrent
// writer blocks on the row lock, then matches zero rows once the first
// writer commits.
//
// Relay locking: SELECT ... FOR UPDATE SKIP LOCKED inside a transaction that
// stays open for the lifetime of the LockedBatch.
//
// ============================================================================

type PgQuery<'q> = sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>;

const SCHEMA: &str = include_str!("../../migrations/0001_orders_outbox.sql");

const SELECT_ORDER: &str = "SELECT id, customer_id, delivery_address, status, payment_id, \
     cancellation_reason, version, created_at, updated_at FROM orders WHERE id = $1";

const SELECT_ITEMS: &str = "SELECT id, title, price_cents, quantity FROM product_items \
     WHERE order_id = $1 ORDER BY position";

const SELECT_PENDING: &str = "SELECT event_id, aggregate_id, event_type, data, version, created_at, attempts \
     FROM outbox_table WHERE next_attempt_at <= clock_timestamp() \
     ORDER BY next_attempt_at, created_at, version LIMIT $1 FOR UPDATE SKIP LOCKED";

const SELECT_PENDING_BY_ID: &str = "SELECT event_id, aggregate_id, event_type, data, version, created_at, attempts \
     FROM outbox_table WHERE event_id = $1 FOR UPDATE SKIP LOCKED";

#[derive(Clone)]
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;

        tracing::info!("Connected to PostgreSQL");
        Ok(Self::new(pool))
    }

    /// Create tables and indexes if they do not exist.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        tracing::info!("Order store schema is up to date");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn lock(&self, query: PgQuery<'_>) -> Result<PgLockedBatch, StoreError> {
        let mut tx = self.pool.begin().await?;
        let rows = query.fetch_all(&mut *tx).await?;
        let records = rows
            .iter()
            .map(record_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(PgLockedBatch { tx, records })
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn begin(&self) -> Result<Box<dyn OrderTransaction>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgOrderTransaction { tx }))
    }

    async fn get_order(&self, order_id: Uuid) -> Result<Option<Order>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        fetch_order(&mut conn, order_id).await
    }

    async fn lock_pending_batch(&self, limit: usize) -> Result<Box<dyn LockedBatch>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let batch = self.lock(sqlx::query(SELECT_PENDING).bind(limit)).await?;
        Ok(Box::new(batch))
    }

    async fn lock_record(&self, event_id: Uuid) -> Result<Option<Box<dyn LockedBatch>>, StoreError> {
        let batch = self.lock(sqlx::query(SELECT_PENDING_BY_ID).bind(event_id)).await?;
        if batch.records.is_empty() {
            batch.tx.rollback().await?;
            return Ok(None);
        }
        Ok(Some(Box::new(batch)))
    }

    async fn pending_count(&self) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM outbox_table")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

struct PgOrderTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl OrderTransaction for PgOrderTransaction {
    async fn load_order(&mut self, order_id: Uuid) -> Result<Option<Order>, StoreError> {
        fetch_order(&mut self.tx, order_id).await
    }

    async fn save_order(&mut self, order: &Order, expected_version: i64) -> Result<(), StoreError> {
        let conflict = || StoreError::ConcurrentModification {
            order_id: order.id,
            expected_version,
        };

        if expected_version == 0 {
            let inserted = sqlx::query(
                "INSERT INTO orders (
                    id, customer_id, delivery_address, status, payment_id,
                    cancellation_reason, version, created_at, updated_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            )
            .bind(order.id)
            .bind(order.customer_id)
            .bind(&order.delivery_address)
            .bind(order.status.as_str())
            .bind(&order.payment_id)
            .bind(&order.cancellation_reason)
            .bind(order.version)
            .bind(order.created_at)
            .bind(order.updated_at)
            .execute(&mut *self.tx)
            .await;

            match inserted {
                Err(sqlx::Error::Database(e)) if e.is_unique_violation() => return Err(conflict()),
                other => {
                    other?;
                }
            }
        } else {
            let result = sqlx::query(
                "UPDATE orders SET
                    delivery_address = $2, status = $3, payment_id = $4,
                    cancellation_reason = $5, version = $6, updated_at = $7
                 WHERE id = $1 AND version = $8",
            )
            .bind(order.id)
            .bind(&order.delivery_address)
            .bind(order.status.as_str())
            .bind(&order.payment_id)
            .bind(&order.cancellation_reason)
            .bind(order.version)
            .bind(order.updated_at)
            .bind(expected_version)
            .execute(&mut *self.tx)
            .await?;

            if result.rows_affected() == 0 {
                return Err(conflict());
            }

            sqlx::query("DELETE FROM product_items WHERE order_id = $1")
                .bind(order.id)
                .execute(&mut *self.tx)
                .await?;
        }

        for (position, item) in order.product_items.iter().enumerate() {
            sqlx::query(
                "INSERT INTO product_items (id, order_id, position, title, price_cents, quantity)
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(item.id)
            .bind(order.id)
            .bind(position as i32)
            .bind(&item.title)
            .bind(item.price_cents)
            .bind(item.quantity)
            .execute(&mut *self.tx)
            .await?;
        }

        Ok(())
    }

    async fn insert_outbox_record(&mut self, record: &OutboxRecord) -> Result<Uuid, StoreError> {
        let event_id: Uuid = sqlx::query_scalar(
            "INSERT INTO outbox_table (aggregate_id, event_type, data, version, created_at)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING event_id",
        )
        .bind(record.aggregate_id)
        .bind(&record.event_type)
        .bind(&record.payload)
        .bind(record.version)
        .bind(record.created_at)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(event_id)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

struct PgLockedBatch {
    tx: Transaction<'static, Postgres>,
    records: Vec<OutboxRecord>,
}

impl PgLockedBatch {
    fn ensure_held(&self, event_id: Uuid) -> Result<(), StoreError> {
        if self.records.iter().any(|r| r.event_id == Some(event_id)) {
            Ok(())
        } else {
            Err(StoreError::NotLocked(event_id))
        }
    }
}

#[async_trait]
impl LockedBatch for PgLockedBatch {
    fn records(&self) -> &[OutboxRecord] {
        &self.records
    }

    async fn delete(&mut self, event_id: Uuid) -> Result<(), StoreError> {
        self.ensure_held(event_id)?;

        sqlx::query("DELETE FROM outbox_table WHERE event_id = $1")
            .bind(event_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn defer(&mut self, event_id: Uuid, delay: Duration) -> Result<(), StoreError> {
        self.ensure_held(event_id)?;

        // clock_timestamp(), not now(): this tx may have been open for a while.
        sqlx::query(
            "UPDATE outbox_table
             SET attempts = attempts + 1,
                 next_attempt_at = clock_timestamp() + make_interval(secs => $2)
             WHERE event_id = $1",
        )
        .bind(event_id)
        .bind(delay.as_secs_f64())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn release(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}

async fn fetch_order(conn: &mut PgConnection, order_id: Uuid) -> Result<Option<Order>, StoreError> {
    let Some(row) = sqlx::query(SELECT_ORDER)
        .bind(order_id)
        .fetch_optional(&mut *conn)
        .await?
    else {
        return Ok(None);
    };

    let items = sqlx::query(SELECT_ITEMS)
        .bind(order_id)
        .fetch_all(&mut *conn)
        .await?
        .iter()
        .map(|r| -> Result<ProductItem, sqlx::Error> {
            Ok(ProductItem {
                id: r.try_get("id")?,
                title: r.try_get("title")?,
                price_cents: r.try_get("price_cents")?,
                quantity: r.try_get("quantity")?,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let status: String = row.try_get("status")?;
    let status = OrderStatus::parse(&status)
        .ok_or_else(|| StoreError::Corrupt(format!("order {order_id} has unknown status '{status}'")))?;

    Ok(Some(Order {
        id: row.try_get("id")?,
        version: row.try_get("version")?,
        customer_id: row.try_get("customer_id")?,
        delivery_address: row.try_get("delivery_address")?,
        status,
        product_items: items,
        payment_id: row.try_get("payment_id")?,
        cancellation_reason: row.try_get("cancellation_reason")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    }))
}

fn record_from_row(row: &PgRow) -> Result<OutboxRecord, StoreError> {
    Ok(OutboxRecord {
        event_id: Some(row.try_get("event_id")?),
        aggregate_id: row.try_get("aggregate_id")?,
        event_type: row.try_get("event_type")?,
        payload: row.try_get("data")?,
        version: row.try_get("version")?,
        created_at: row.try_get("created_at")?,
        attempts: row.try_get("attempts")?,
    })
}

// ============================================================================
// Integration Tests
// ============================================================================
//
// These need a disposable PostgreSQL database:
//   DATABASE_URL=postgres://... cargo test -- --ignored
//
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::OrderCommand;
    use std::collections::HashSet;

    #[test]
    fn test_schema_defines_all_tables() {
        for table in ["orders", "product_items", "outbox_table"] {
            assert!(SCHEMA.contains(&format!("CREATE TABLE IF NOT EXISTS {table}")));
        }
        assert!(SCHEMA.contains("next_attempt_at"));
        assert!(SELECT_PENDING.contains("FOR UPDATE SKIP LOCKED"));
        assert!(SELECT_PENDING.contains("next_attempt_at <="));
        assert!(!SELECT_PENDING_BY_ID.contains("next_attempt_at"));
        assert!(SELECT_PENDING_BY_ID.contains("FOR UPDATE SKIP LOCKED"));
    }

    async fn test_store() -> PgOrderStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for ignored tests");
        let store = PgOrderStore::connect(&url, 4).await.unwrap();
        store.migrate().await.unwrap();
        sqlx::query("DELETE FROM outbox_table").execute(store.pool()).await.unwrap();
        store
    }

    fn created(order_id: Uuid) -> (Order, OutboxRecord) {
        let mut order = Order::draft(order_id);
        let event = order
            .handle_command(&OrderCommand::CreateOrder {
                customer_id: Uuid::new_v4(),
                delivery_address: "4 Oak St".to_string(),
                items: vec![ProductItem::new("Table", 30_000, 1), ProductItem::new("Cloth", 2_000, 2)],
            })
            .unwrap();
        order.apply_event(&event);
        let record = OutboxRecord {
            event_id: None,
            aggregate_id: order.id,
            event_type: event.event_type().as_str().to_string(),
            payload: serde_json::to_vec(&event).unwrap(),
            version: order.version,
            created_at: Utc::now(),
            attempts: 0,
        };
        (order, record)
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_round_trip_and_optimistic_lock() {
        let store = test_store().await;
        let (order, record) = created(Uuid::new_v4());

        let mut tx = store.begin().await.unwrap();
        tx.save_order(&order, 0).await.unwrap();
        tx.insert_outbox_record(&record).await.unwrap();
        tx.commit().await.unwrap();

        let loaded = store.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(loaded.product_items, order.product_items);
        assert_eq!(loaded.version, 1);

        let mut stale = store.begin().await.unwrap();
        let mut bumped = loaded.clone();
        bumped.version = 2;
        assert!(matches!(
            stale.save_order(&bumped, 5).await,
            Err(StoreError::ConcurrentModification { .. })
        ));
        stale.rollback().await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_skip_locked_batches_are_disjoint() {
        let store = test_store().await;
        for _ in 0..4 {
            let (order, record) = created(Uuid::new_v4());
            let mut tx = store.begin().await.unwrap();
            tx.save_order(&order, 0).await.unwrap();
            tx.insert_outbox_record(&record).await.unwrap();
            tx.commit().await.unwrap();
        }

        let first = store.lock_pending_batch(2).await.unwrap();
        let second = store.lock_pending_batch(10).await.unwrap();

        let a: HashSet<_> = first.records().iter().filter_map(|r| r.event_id).collect();
        let b: HashSet<_> = second.records().iter().filter_map(|r| r.event_id).collect();
        assert_eq!(a.len(), 2);
        assert_eq!(b.len(), 2);
        assert!(a.is_disjoint(&b));

        first.release().await.unwrap();
        second.release().await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_deferred_record_waits_until_due() {
        let store = test_store().await;
        let (order, record) = created(Uuid::new_v4());
        let mut tx = store.begin().await.unwrap();
        tx.save_order(&order, 0).await.unwrap();
        let event_id = tx.insert_outbox_record(&record).await.unwrap();
        tx.commit().await.unwrap();

        let mut batch = store.lock_pending_batch(10).await.unwrap();
        batch.defer(event_id, Duration::from_secs(3600)).await.unwrap();
        batch.release().await.unwrap();

        assert!(store.lock_pending_batch(10).await.unwrap().records().is_empty());

        let held = store.lock_record(event_id).await.unwrap().unwrap();
        assert_eq!(held.records()[0].attempts, 1);
        held.release().await.unwrap();
    }
}

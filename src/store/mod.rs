// ============================================================================
// Order Store - durable aggregate + outbox persistence
// ============================================================================
//
// The store owns transaction demarcation and row locking. The command
// handler and the relay only talk to these traits:
//
//   OrderStore::begin()              -> OrderTransaction (aggregate + outbox writes)
//   OrderStore::lock_pending_batch() -> LockedBatch     (relay sweep)
//   OrderStore::lock_record()        -> LockedBatch     (post-commit publish)
//
// A LockedBatch holds exclusive, skip-locked row locks until it is released
// or dropped. Deletes and deferrals issued through it only become visible on
// release().
//
// Pending rows are handed out by retry schedule, then age. A deferred row
// moves behind everything already due, so rows that keep failing never
// starve newer ones.
//
// ============================================================================

mod memory;
mod postgres;

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::order::Order;
use crate::outbox::OutboxRecord;

pub use memory::InMemoryOrderStore;
pub use postgres::PgOrderStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Concurrent modification of order {order_id}: expected version {expected_version}")]
    ConcurrentModification { order_id: Uuid, expected_version: i64 },

    #[error("Outbox record {0} is not held by this batch")]
    NotLocked(Uuid),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn OrderTransaction>, StoreError>;

    /// Committed state of an order, outside any transaction.
    async fn get_order(&self, order_id: Uuid) -> Result<Option<Order>, StoreError>;

    /// Lock up to `limit` records that are due, earliest scheduled first.
    /// Records locked by another caller are skipped, never waited on or
    /// returned twice.
    async fn lock_pending_batch(&self, limit: usize) -> Result<Box<dyn LockedBatch>, StoreError>;

    /// Lock one record regardless of its schedule. `None` when it is already
    /// gone or locked elsewhere.
    async fn lock_record(&self, event_id: Uuid) -> Result<Option<Box<dyn LockedBatch>>, StoreError>;

    async fn pending_count(&self) -> Result<i64, StoreError>;
}

/// One atomic unit of work. Dropping it without `commit` rolls it back.
#[async_trait]
pub trait OrderTransaction: Send {
    async fn load_order(&mut self, order_id: Uuid) -> Result<Option<Order>, StoreError>;

    /// Persist `order`. `expected_version` is the version read at the start of
    /// the command; 0 means the order must not exist yet.
    async fn save_order(&mut self, order: &Order, expected_version: i64) -> Result<(), StoreError>;

    /// Returns the store-assigned event id.
    async fn insert_outbox_record(&mut self, record: &OutboxRecord) -> Result<Uuid, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

#[async_trait]
pub trait LockedBatch: Send {
    fn records(&self) -> &[OutboxRecord];

    async fn delete(&mut self, event_id: Uuid) -> Result<(), StoreError>;

    /// Count a failed attempt and make the record due again after `delay`.
    async fn defer(&mut self, event_id: Uuid, delay: Duration) -> Result<(), StoreError>;

    /// Make deletes durable and release every lock in the batch.
    async fn release(self: Box<Self>) -> Result<(), StoreError>;
}

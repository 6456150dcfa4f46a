use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{LockedBatch, OrderStore, OrderTransaction, StoreError};
use crate::domain::order::Order;
use crate::outbox::OutboxRecord;

// ============================================================================
// In-Memory Order Store
// ============================================================================
//
// Same contract as the PostgreSQL store:
// - transactions buffer their writes and apply them all-or-nothing on commit,
//   re-checking every optimistic version under the state lock
// - outbox rows are kept in insertion order and locked with skip semantics,
//   due rows first by (due_at, turn); a deferral takes a fresh turn
//
// Used for the demo mode without DATABASE_URL and by the tests, which can
// inject save/commit faults.
//
// ============================================================================

struct Pending {
    record: OutboxRecord,
    due_at: DateTime<Utc>,
    turn: u64,
}

#[derive(Default)]
struct State {
    orders: HashMap<Uuid, Order>,
    outbox: BTreeMap<u64, Pending>,
    locked: HashSet<Uuid>,
    next_seq: u64,
    next_turn: u64,
    fail_next_save: bool,
    fail_next_commit: bool,
}

impl State {
    fn check_version(&self, order_id: Uuid, expected_version: i64) -> Result<(), StoreError> {
        let current = self.orders.get(&order_id).map(|o| o.version);
        let matches = match current {
            None => expected_version == 0,
            Some(version) => expected_version != 0 && version == expected_version,
        };

        if matches {
            Ok(())
        } else {
            Err(StoreError::ConcurrentModification { order_id, expected_version })
        }
    }

    fn take_turn(&mut self) -> u64 {
        let turn = self.next_turn;
        self.next_turn += 1;
        turn
    }

    fn append_record(&mut self, record: OutboxRecord) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let turn = self.take_turn();
        self.outbox.insert(seq, Pending { record, due_at: Utc::now(), turn });
    }

    fn lock_where<F>(&mut self, limit: usize, due_only: bool, mut pick: F) -> Vec<OutboxRecord>
    where
        F: FnMut(&OutboxRecord) -> bool,
    {
        let now = Utc::now();
        let mut candidates: Vec<&Pending> = self
            .outbox
            .values()
            .filter(|p| p.record.event_id.is_some_and(|id| !self.locked.contains(&id)))
            .filter(|p| !due_only || p.due_at <= now)
            .filter(|p| pick(&p.record))
            .collect();
        candidates.sort_by_key(|p| (p.due_at, p.turn));

        let batch: Vec<OutboxRecord> = candidates
            .into_iter()
            .take(limit)
            .map(|p| p.record.clone())
            .collect();

        for record in &batch {
            if let Some(event_id) = record.event_id {
                self.locked.insert(event_id);
            }
        }
        batch
    }
}

#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    state: Arc<Mutex<State>>,
}

fn lock_state(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `save_order` call fails as if the database were unreachable.
    pub fn fail_next_save(&self) {
        lock_state(&self.state).fail_next_save = true;
    }

    /// The next `commit` call fails after all writes were staged.
    pub fn fail_next_commit(&self) {
        lock_state(&self.state).fail_next_commit = true;
    }

    /// Committed outbox rows in insertion order.
    pub fn outbox_records(&self) -> Vec<OutboxRecord> {
        lock_state(&self.state)
            .outbox
            .values()
            .map(|p| p.record.clone())
            .collect()
    }

    pub fn order_count(&self) -> usize {
        lock_state(&self.state).orders.len()
    }

    /// Insert an outbox row directly, bypassing the aggregate. Simulates rows
    /// written by another deployment of the service.
    pub fn seed_outbox_record(&self, mut record: OutboxRecord) -> Uuid {
        let event_id = record.event_id.unwrap_or_else(Uuid::now_v7);
        record.event_id = Some(event_id);
        lock_state(&self.state).append_record(record);
        event_id
    }

    fn batch(&self, records: Vec<OutboxRecord>) -> Box<dyn LockedBatch> {
        Box::new(MemoryBatch {
            state: self.state.clone(),
            records,
            deletions: Vec::new(),
            deferrals: Vec::new(),
            released: false,
        })
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn begin(&self) -> Result<Box<dyn OrderTransaction>, StoreError> {
        Ok(Box::new(MemoryTransaction {
            state: self.state.clone(),
            staged_orders: Vec::new(),
            staged_records: Vec::new(),
        }))
    }

    async fn get_order(&self, order_id: Uuid) -> Result<Option<Order>, StoreError> {
        Ok(lock_state(&self.state).orders.get(&order_id).cloned())
    }

    async fn lock_pending_batch(&self, limit: usize) -> Result<Box<dyn LockedBatch>, StoreError> {
        let records = lock_state(&self.state).lock_where(limit, true, |_| true);
        Ok(self.batch(records))
    }

    async fn lock_record(&self, event_id: Uuid) -> Result<Option<Box<dyn LockedBatch>>, StoreError> {
        let records = lock_state(&self.state).lock_where(1, false, |r| r.event_id == Some(event_id));
        if records.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.batch(records)))
    }

    async fn pending_count(&self) -> Result<i64, StoreError> {
        Ok(lock_state(&self.state).outbox.len() as i64)
    }
}

struct MemoryTransaction {
    state: Arc<Mutex<State>>,
    staged_orders: Vec<(Order, i64)>,
    staged_records: Vec<OutboxRecord>,
}

#[async_trait]
impl OrderTransaction for MemoryTransaction {
    async fn load_order(&mut self, order_id: Uuid) -> Result<Option<Order>, StoreError> {
        if let Some((order, _)) = self.staged_orders.iter().rev().find(|(o, _)| o.id == order_id) {
            return Ok(Some(order.clone()));
        }
        Ok(lock_state(&self.state).orders.get(&order_id).cloned())
    }

    async fn save_order(&mut self, order: &Order, expected_version: i64) -> Result<(), StoreError> {
        {
            let mut state = lock_state(&self.state);
            if std::mem::take(&mut state.fail_next_save) {
                return Err(StoreError::Unavailable("injected save failure".to_string()));
            }
            state.check_version(order.id, expected_version)?;
        }

        self.staged_orders.push((order.clone(), expected_version));
        Ok(())
    }

    async fn insert_outbox_record(&mut self, record: &OutboxRecord) -> Result<Uuid, StoreError> {
        let event_id = Uuid::now_v7();
        let mut record = record.clone();
        record.event_id = Some(event_id);
        self.staged_records.push(record);
        Ok(event_id)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let this = *self;
        let mut state = lock_state(&this.state);

        if std::mem::take(&mut state.fail_next_commit) {
            return Err(StoreError::Unavailable("injected commit failure".to_string()));
        }

        // Validate everything before applying anything.
        for (order, expected_version) in &this.staged_orders {
            state.check_version(order.id, *expected_version)?;
        }

        for (order, _) in this.staged_orders {
            state.orders.insert(order.id, order);
        }
        for record in this.staged_records {
            state.append_record(record);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

struct MemoryBatch {
    state: Arc<Mutex<State>>,
    records: Vec<OutboxRecord>,
    deletions: Vec<Uuid>,
    deferrals: Vec<(Uuid, Duration)>,
    released: bool,
}

impl MemoryBatch {
    fn ensure_held(&self, event_id: Uuid) -> Result<(), StoreError> {
        if self.records.iter().any(|r| r.event_id == Some(event_id)) {
            Ok(())
        } else {
            Err(StoreError::NotLocked(event_id))
        }
    }

    fn unlock(&self, state: &mut State) {
        for event_id in self.records.iter().filter_map(|r| r.event_id) {
            state.locked.remove(&event_id);
        }
    }
}

#[async_trait]
impl LockedBatch for MemoryBatch {
    fn records(&self) -> &[OutboxRecord] {
        &self.records
    }

    async fn delete(&mut self, event_id: Uuid) -> Result<(), StoreError> {
        self.ensure_held(event_id)?;
        self.deletions.push(event_id);
        Ok(())
    }

    async fn defer(&mut self, event_id: Uuid, delay: Duration) -> Result<(), StoreError> {
        self.ensure_held(event_id)?;
        self.deferrals.push((event_id, delay));
        Ok(())
    }

    async fn release(mut self: Box<Self>) -> Result<(), StoreError> {
        let state_handle = self.state.clone();
        let mut state = lock_state(&state_handle);

        state
            .outbox
            .retain(|_, p| !p.record.event_id.is_some_and(|id| self.deletions.contains(&id)));

        let now = Utc::now();
        for (event_id, delay) in std::mem::take(&mut self.deferrals) {
            let turn = state.take_turn();
            let Some(pending) = state
                .outbox
                .values_mut()
                .find(|p| p.record.event_id == Some(event_id))
            else {
                continue;
            };
            pending.record.attempts += 1;
            pending.due_at = chrono::Duration::from_std(delay)
                .ok()
                .and_then(|d| now.checked_add_signed(d))
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            pending.turn = turn;
        }

        self.unlock(&mut state);
        self.released = true;
        Ok(())
    }
}

impl Drop for MemoryBatch {
    fn drop(&mut self) {
        if !self.released {
            let state_handle = self.state.clone();
            let mut state = lock_state(&state_handle);
            self.unlock(&mut state);
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

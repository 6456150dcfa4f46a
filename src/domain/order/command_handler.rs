use std::sync::Arc;
use uuid::Uuid;

use crate::outbox::{CodecError, EnvelopeBuilder, OutboxRelay, PublishOutcome};
use crate::store::{OrderStore, OrderTransaction, StoreError};

use super::aggregate::Order;
use super::commands::OrderCommand;
use super::errors::OrderError;
use super::value_objects::ProductItem;

// ============================================================================
// Order Command Handler
// ============================================================================
//
// Orchestrates: Command → Aggregate → Event → (Order + Outbox) in one tx
//
// Once committed, the new outbox record is handed to the relay right away.
// That publish is best-effort: if it fails the periodic sweep delivers it.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum OrderServiceError {
    #[error("Order not found: {0}")]
    NotFound(Uuid),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(#[from] OrderError),

    #[error("Order {order_id} was modified concurrently (expected version {expected_version})")]
    ConcurrentModification { order_id: Uuid, expected_version: i64 },

    #[error("Persistence error: {0}")]
    Persistence(StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] CodecError),
}

impl From<StoreError> for OrderServiceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::ConcurrentModification { order_id, expected_version } => {
                OrderServiceError::ConcurrentModification { order_id, expected_version }
            }
            other => OrderServiceError::Persistence(other),
        }
    }
}

pub struct OrderCommandHandler {
    store: Arc<dyn OrderStore>,
    builder: EnvelopeBuilder,
    relay: Arc<OutboxRelay>,
}

impl OrderCommandHandler {
    pub fn new(store: Arc<dyn OrderStore>, builder: EnvelopeBuilder, relay: Arc<OutboxRelay>) -> Self {
        Self { store, builder, relay }
    }

    /// Apply `command` to the order and record its event in the outbox,
    /// atomically. Returns the order as committed.
    pub async fn handle(&self, order_id: Uuid, command: OrderCommand) -> Result<Order, OrderServiceError> {
        let mut tx = self.store.begin().await?;

        let (order, event_id) = match self.stage(tx.as_mut(), order_id, &command).await {
            Ok(staged) => staged,
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(order_id = %order_id, error = %rollback_err, "Rollback failed");
                }
                tracing::debug!(
                    order_id = %order_id,
                    command = command.name(),
                    error = %e,
                    "Command rejected"
                );
                return Err(e);
            }
        };

        tx.commit().await?;

        tracing::info!(
            order_id = %order_id,
            command = command.name(),
            version = order.version,
            event_id = %event_id,
            "Order updated"
        );

        self.publish_after_commit(event_id).await;
        Ok(order)
    }

    async fn stage(
        &self,
        tx: &mut dyn OrderTransaction,
        order_id: Uuid,
        command: &OrderCommand,
    ) -> Result<(Order, Uuid), OrderServiceError> {
        // A create never reads: an existing id is caught by the insert.
        let current = if command.is_create() {
            Order::draft(order_id)
        } else {
            tx.load_order(order_id)
                .await?
                .ok_or(OrderServiceError::NotFound(order_id))?
        };

        let expected_version = current.version;
        let event = current.handle_command(command)?;

        let mut order = current;
        order.apply_event(&event);

        tx.save_order(&order, expected_version).await?;

        let record = self.builder.build_for(&order, &event)?;
        let event_id = tx.insert_outbox_record(&record).await?;

        Ok((order, event_id))
    }

    async fn publish_after_commit(&self, event_id: Uuid) {
        match self.relay.publish_one(event_id).await {
            Ok(PublishOutcome::Published) => {
                tracing::debug!(event_id = %event_id, "Event published immediately");
            }
            Ok(PublishOutcome::Skipped) => {
                tracing::debug!(event_id = %event_id, "Event already picked up by the relay");
            }
            Err(e) => {
                tracing::warn!(
                    event_id = %event_id,
                    error = %e,
                    "Immediate publish failed, relay sweep will retry"
                );
            }
        }
    }

    pub async fn create_order(
        &self,
        customer_id: Uuid,
        delivery_address: impl Into<String>,
        items: Vec<ProductItem>,
    ) -> Result<Order, OrderServiceError> {
        let command = OrderCommand::CreateOrder {
            customer_id,
            delivery_address: delivery_address.into(),
            items,
        };
        self.handle(Uuid::now_v7(), command).await
    }

    pub async fn add_product_item(&self, order_id: Uuid, item: ProductItem) -> Result<Order, OrderServiceError> {
        self.handle(order_id, OrderCommand::AddProductItem { item }).await
    }

    pub async fn remove_product_item(&self, order_id: Uuid, item_id: Uuid) -> Result<Order, OrderServiceError> {
        self.handle(order_id, OrderCommand::RemoveProductItem { item_id }).await
    }

    pub async fn pay(&self, order_id: Uuid, payment_id: impl Into<String>) -> Result<Order, OrderServiceError> {
        let payment_id = payment_id.into();
        self.handle(order_id, OrderCommand::Pay { payment_id }).await
    }

    pub async fn cancel(&self, order_id: Uuid, reason: Option<String>) -> Result<Order, OrderServiceError> {
        self.handle(order_id, OrderCommand::Cancel { reason }).await
    }

    pub async fn submit(&self, order_id: Uuid) -> Result<Order, OrderServiceError> {
        self.handle(order_id, OrderCommand::Submit).await
    }

    pub async fn complete(&self, order_id: Uuid) -> Result<Order, OrderServiceError> {
        self.handle(order_id, OrderCommand::Complete).await
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<Order, OrderServiceError> {
        self.store
            .get_order(order_id)
            .await?
            .ok_or(OrderServiceError::NotFound(order_id))
    }
}

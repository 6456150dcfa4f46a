use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};

use super::value_objects::{ProductItem, OrderStatus};
use super::events::*;
use super::commands::OrderCommand;
use super::errors::OrderError;

// ============================================================================
// Order Aggregate - Domain Logic
// ============================================================================
//
// Commands are validated against current state and turned into exactly one
// event; applying that event is the only way state (and version) changes.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    // Identity
    pub id: Uuid,
    pub version: i64,

    // Current State
    pub customer_id: Uuid,
    pub delivery_address: String,
    pub status: OrderStatus,
    pub product_items: Vec<ProductItem>,
    pub payment_id: Option<String>,
    pub cancellation_reason: Option<String>,

    // Audit Trail
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Empty, unpersisted order used as the starting point of a create command.
    pub fn draft(id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id,
            version: 0,
            customer_id: Uuid::nil(),
            delivery_address: String::new(),
            status: OrderStatus::New,
            product_items: Vec::new(),
            payment_id: None,
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn total_cents(&self) -> i64 {
        self.product_items
            .iter()
            .map(ProductItem::total_cents)
            .fold(0, i64::saturating_add)
    }

    fn validate_items(items: &[ProductItem]) -> Result<(), OrderError> {
        if items.is_empty() {
            return Err(OrderError::EmptyItems);
        }

        let mut seen = HashSet::with_capacity(items.len());
        for item in items {
            Self::validate_item(item)?;
            if !seen.insert(item.id) {
                return Err(OrderError::DuplicateItem(item.id));
            }
        }

        Ok(())
    }

    fn validate_item(item: &ProductItem) -> Result<(), OrderError> {
        if item.quantity <= 0 {
            return Err(OrderError::InvalidQuantity(item.quantity));
        }
        Ok(())
    }

    fn require_status(&self, expected: OrderStatus, action: &'static str) -> Result<(), OrderError> {
        if self.status == OrderStatus::Cancelled {
            return Err(OrderError::AlreadyCancelled);
        }
        if self.status != expected {
            return Err(OrderError::InvalidStatusTransition {
                action,
                status: self.status,
            });
        }
        Ok(())
    }

    /// Validate a command and produce the single event it results in.
    /// The aggregate itself is not modified.
    pub fn handle_command(&self, command: &OrderCommand) -> Result<OrderEvent, OrderError> {
        let order_id = self.id;
        let version = self.version + 1;

        match command {
            OrderCommand::CreateOrder { customer_id, delivery_address, items } => {
                self.require_status(OrderStatus::New, "create")?;
                Self::validate_items(items)?;

                Ok(OrderEvent::OrderCreated(OrderCreated {
                    order_id,
                    version,
                    customer_id: *customer_id,
                    delivery_address: delivery_address.clone(),
                    items: items.clone(),
                }))
            }

            OrderCommand::AddProductItem { item } => {
                self.require_status(OrderStatus::Created, "add items to")?;
                Self::validate_item(item)?;
                if self.product_items.iter().any(|i| i.id == item.id) {
                    return Err(OrderError::DuplicateItem(item.id));
                }

                Ok(OrderEvent::ProductItemAdded(ProductItemAdded {
                    order_id,
                    version,
                    item: item.clone(),
                }))
            }

            OrderCommand::RemoveProductItem { item_id } => {
                self.require_status(OrderStatus::Created, "remove items from")?;
                if !self.product_items.iter().any(|i| i.id == *item_id) {
                    return Err(OrderError::ItemNotFound(*item_id));
                }

                Ok(OrderEvent::ProductItemRemoved(ProductItemRemoved {
                    order_id,
                    version,
                    item_id: *item_id,
                }))
            }

            OrderCommand::Pay { payment_id } => {
                if self.status == OrderStatus::Paid {
                    return Err(OrderError::AlreadyPaid);
                }
                self.require_status(OrderStatus::Created, "pay")?;
                if payment_id.trim().is_empty() {
                    return Err(OrderError::MissingPaymentId);
                }
                Self::validate_items(&self.product_items)?;

                Ok(OrderEvent::OrderPaid(OrderPaid {
                    order_id,
                    version,
                    payment_id: payment_id.clone(),
                }))
            }

            OrderCommand::Cancel { reason } => {
                match self.status {
                    OrderStatus::Cancelled => return Err(OrderError::AlreadyCancelled),
                    OrderStatus::New | OrderStatus::Completed => {
                        return Err(OrderError::InvalidStatusTransition {
                            action: "cancel",
                            status: self.status,
                        })
                    }
                    // Can cancel from Created, Paid, or Submitted
                    _ => {}
                }

                Ok(OrderEvent::OrderCancelled(OrderCancelled {
                    order_id,
                    version,
                    reason: reason.clone(),
                }))
            }

            OrderCommand::Submit => {
                match self.status {
                    OrderStatus::Paid => {}
                    OrderStatus::Created => return Err(OrderError::NotPaid),
                    _ => self.require_status(OrderStatus::Paid, "submit")?,
                }

                Ok(OrderEvent::OrderSubmitted(OrderSubmitted {
                    order_id,
                    version,
                    items: self.product_items.clone(),
                }))
            }

            OrderCommand::Complete => {
                match self.status {
                    OrderStatus::Submitted => {}
                    OrderStatus::Created | OrderStatus::Paid => return Err(OrderError::NotSubmitted),
                    _ => self.require_status(OrderStatus::Submitted, "complete")?,
                }

                Ok(OrderEvent::OrderCompleted(OrderCompleted {
                    order_id,
                    version,
                    completed_at: Utc::now(),
                }))
            }
        }
    }

    /// Apply an event produced by [`Order::handle_command`]. Moves the version
    /// forward to the event's version.
    pub fn apply_event(&mut self, event: &OrderEvent) {
        self.updated_at = Utc::now();

        match event {
            OrderEvent::OrderCreated(e) => {
                self.customer_id = e.customer_id;
                self.delivery_address = e.delivery_address.clone();
                self.product_items = e.items.clone();
                self.status = OrderStatus::Created;
                self.created_at = self.updated_at;
            }
            OrderEvent::ProductItemAdded(e) => {
                self.product_items.push(e.item.clone());
            }
            OrderEvent::ProductItemRemoved(e) => {
                self.product_items.retain(|i| i.id != e.item_id);
            }
            OrderEvent::OrderPaid(e) => {
                self.status = OrderStatus::Paid;
                self.payment_id = Some(e.payment_id.clone());
            }
            OrderEvent::OrderCancelled(e) => {
                self.status = OrderStatus::Cancelled;
                self.cancellation_reason = e.reason.clone();
            }
            OrderEvent::OrderSubmitted(_) => {
                self.status = OrderStatus::Submitted;
            }
            OrderEvent::OrderCompleted(_) => {
                self.status = OrderStatus::Completed;
            }
        }

        self.version = event.version();
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn execute(order: &mut Order, command: OrderCommand) -> Result<OrderEvent, OrderError> {
        let event = order.handle_command(&command)?;
        order.apply_event(&event);
        Ok(event)
    }

    fn created_order() -> Order {
        let mut order = Order::draft(Uuid::new_v4());
        execute(
            &mut order,
            OrderCommand::CreateOrder {
                customer_id: Uuid::new_v4(),
                delivery_address: "1 Main St".to_string(),
                items: vec![ProductItem::new("Book", 1_500, 2)],
            },
        )
        .unwrap();
        order
    }

    #[test]
    fn test_create_sets_version_one() {
        let order = created_order();
        assert_eq!(order.version, 1);
        assert_eq!(order.status, OrderStatus::Created);
        assert_eq!(order.product_items.len(), 1);
        assert_eq!(order.total_cents(), 3_000);
    }

    #[test]
    fn test_create_requires_items() {
        let order = Order::draft(Uuid::new_v4());
        let result = order.handle_command(&OrderCommand::CreateOrder {
            customer_id: Uuid::new_v4(),
            delivery_address: String::new(),
            items: vec![],
        });
        assert_eq!(result, Err(OrderError::EmptyItems));
    }

    #[test]
    fn test_create_rejects_non_positive_quantity() {
        let order = Order::draft(Uuid::new_v4());
        let result = order.handle_command(&OrderCommand::CreateOrder {
            customer_id: Uuid::new_v4(),
            delivery_address: String::new(),
            items: vec![ProductItem::new("Pen", 100, 0)],
        });
        assert_eq!(result, Err(OrderError::InvalidQuantity(0)));
    }

    #[test]
    fn test_handle_command_does_not_mutate() {
        let order = created_order();
        let before = order.clone();
        let event = order
            .handle_command(&OrderCommand::Pay { payment_id: "p-1".to_string() })
            .unwrap();

        assert_eq!(event.version(), 2);
        assert_eq!(order, before);
    }

    #[test]
    fn test_full_lifecycle_increments_version_each_step() {
        let mut order = created_order();
        let item = ProductItem::new("Lamp", 2_000, 1);
        let item_id = item.id;

        execute(&mut order, OrderCommand::AddProductItem { item }).unwrap();
        assert_eq!(order.product_items.len(), 2);
        execute(&mut order, OrderCommand::RemoveProductItem { item_id }).unwrap();
        assert_eq!(order.product_items.len(), 1);
        execute(&mut order, OrderCommand::Pay { payment_id: "p-1".to_string() }).unwrap();
        execute(&mut order, OrderCommand::Submit).unwrap();
        let event = execute(&mut order, OrderCommand::Complete).unwrap();

        assert_eq!(event.event_type(), EventType::OrderCompleted);
        assert_eq!(order.status, OrderStatus::Completed);
        assert_eq!(order.payment_id.as_deref(), Some("p-1"));
        assert_eq!(order.version, 6);
    }

    #[test]
    fn test_cannot_pay_cancelled_order() {
        let mut order = created_order();
        execute(&mut order, OrderCommand::Cancel { reason: Some("changed mind".to_string()) }).unwrap();
        assert_eq!(order.cancellation_reason.as_deref(), Some("changed mind"));

        let result = order.handle_command(&OrderCommand::Pay { payment_id: "p-1".to_string() });
        assert_eq!(result, Err(OrderError::AlreadyCancelled));
    }

    #[test]
    fn test_cannot_pay_twice() {
        let mut order = created_order();
        execute(&mut order, OrderCommand::Pay { payment_id: "p-1".to_string() }).unwrap();
        let result = order.handle_command(&OrderCommand::Pay { payment_id: "p-2".to_string() });
        assert_eq!(result, Err(OrderError::AlreadyPaid));
    }

    #[test]
    fn test_pay_requires_payment_id() {
        let order = created_order();
        let result = order.handle_command(&OrderCommand::Pay { payment_id: "  ".to_string() });
        assert_eq!(result, Err(OrderError::MissingPaymentId));
    }

    #[test]
    fn test_submit_requires_payment() {
        let order = created_order();
        assert_eq!(order.handle_command(&OrderCommand::Submit), Err(OrderError::NotPaid));
    }

    #[test]
    fn test_complete_requires_submission() {
        let mut order = created_order();
        execute(&mut order, OrderCommand::Pay { payment_id: "p-1".to_string() }).unwrap();
        assert_eq!(order.handle_command(&OrderCommand::Complete), Err(OrderError::NotSubmitted));
    }

    #[test]
    fn test_cancel_allowed_after_submit_but_not_after_complete() {
        let mut order = created_order();
        execute(&mut order, OrderCommand::Pay { payment_id: "p-1".to_string() }).unwrap();
        execute(&mut order, OrderCommand::Submit).unwrap();
        assert!(order.handle_command(&OrderCommand::Cancel { reason: None }).is_ok());

        execute(&mut order, OrderCommand::Complete).unwrap();
        assert!(matches!(
            order.handle_command(&OrderCommand::Cancel { reason: None }),
            Err(OrderError::InvalidStatusTransition { action: "cancel", .. })
        ));
    }

    #[test]
    fn test_items_frozen_after_payment() {
        let mut order = created_order();
        execute(&mut order, OrderCommand::Pay { payment_id: "p-1".to_string() }).unwrap();
        let result = order.handle_command(&OrderCommand::AddProductItem {
            item: ProductItem::new("Late", 100, 1),
        });
        assert!(matches!(result, Err(OrderError::InvalidStatusTransition { .. })));
    }

    #[test]
    fn test_remove_unknown_item() {
        let order = created_order();
        let missing = Uuid::new_v4();
        let result = order.handle_command(&OrderCommand::RemoveProductItem { item_id: missing });
        assert_eq!(result, Err(OrderError::ItemNotFound(missing)));
    }

    #[test]
    fn test_duplicate_item_id_rejected() {
        let mut order = created_order();
        let existing = order.product_items[0].clone();
        let result = order.handle_command(&OrderCommand::AddProductItem { item: existing.clone() });
        assert_eq!(result, Err(OrderError::DuplicateItem(existing.id)));

        // Removing by id then adding it back is fine
        execute(&mut order, OrderCommand::RemoveProductItem { item_id: existing.id }).unwrap();
        execute(&mut order, OrderCommand::AddProductItem { item: existing.clone() }).unwrap();
        assert_eq!(order.product_items.len(), 1);

        let item = ProductItem::new("Pen", 200, 1);
        let result = Order::draft(Uuid::new_v4()).handle_command(&OrderCommand::CreateOrder {
            customer_id: Uuid::new_v4(),
            delivery_address: "1 Main St".to_string(),
            items: vec![item.clone(), item.clone()],
        });
        assert_eq!(result, Err(OrderError::DuplicateItem(item.id)));
    }

    #[test]
    fn test_total_saturates_instead_of_overflowing() {
        let mut order = created_order();
        execute(
            &mut order,
            OrderCommand::AddProductItem {
                item: ProductItem::new("Yacht", i64::MAX / 2, 3),
            },
        )
        .unwrap();
        execute(
            &mut order,
            OrderCommand::AddProductItem {
                item: ProductItem::new("Island", i64::MAX, 1),
            },
        )
        .unwrap();
        assert_eq!(order.total_cents(), i64::MAX);
    }
}

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};

use super::value_objects::ProductItem;

// ============================================================================
// Event Types - closed routing vocabulary
// ============================================================================

/// Every integration event an order can emit. The tag returned by
/// [`EventType::as_str`] is what gets persisted in the outbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    OrderCreated,
    ProductItemAdded,
    ProductItemRemoved,
    OrderPaid,
    OrderCancelled,
    OrderSubmitted,
    OrderCompleted,
}

impl EventType {
    pub const ALL: [EventType; 7] = [
        EventType::OrderCreated,
        EventType::ProductItemAdded,
        EventType::ProductItemRemoved,
        EventType::OrderPaid,
        EventType::OrderCancelled,
        EventType::OrderSubmitted,
        EventType::OrderCompleted,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::OrderCreated => "OrderCreated",
            Self::ProductItemAdded => "ProductItemAdded",
            Self::ProductItemRemoved => "ProductItemRemoved",
            Self::OrderPaid => "OrderPaid",
            Self::OrderCancelled => "OrderCancelled",
            Self::OrderSubmitted => "OrderSubmitted",
            Self::OrderCompleted => "OrderCompleted",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == tag)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Order Events - one per successful command
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OrderEvent {
    OrderCreated(OrderCreated),
    ProductItemAdded(ProductItemAdded),
    ProductItemRemoved(ProductItemRemoved),
    OrderPaid(OrderPaid),
    OrderCancelled(OrderCancelled),
    OrderSubmitted(OrderSubmitted),
    OrderCompleted(OrderCompleted),
}

impl OrderEvent {
    pub fn event_type(&self) -> EventType {
        match self {
            Self::OrderCreated(_) => EventType::OrderCreated,
            Self::ProductItemAdded(_) => EventType::ProductItemAdded,
            Self::ProductItemRemoved(_) => EventType::ProductItemRemoved,
            Self::OrderPaid(_) => EventType::OrderPaid,
            Self::OrderCancelled(_) => EventType::OrderCancelled,
            Self::OrderSubmitted(_) => EventType::OrderSubmitted,
            Self::OrderCompleted(_) => EventType::OrderCompleted,
        }
    }

    pub fn version(&self) -> i64 {
        match self {
            Self::OrderCreated(e) => e.version,
            Self::ProductItemAdded(e) => e.version,
            Self::ProductItemRemoved(e) => e.version,
            Self::OrderPaid(e) => e.version,
            Self::OrderCancelled(e) => e.version,
            Self::OrderSubmitted(e) => e.version,
            Self::OrderCompleted(e) => e.version,
        }
    }
}

/// Order Created - full snapshot of the new order
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderCreated {
    pub order_id: Uuid,
    pub version: i64,
    pub customer_id: Uuid,
    pub delivery_address: String,
    pub items: Vec<ProductItem>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ProductItemAdded {
    pub order_id: Uuid,
    pub version: i64,
    pub item: ProductItem,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ProductItemRemoved {
    pub order_id: Uuid,
    pub version: i64,
    pub item_id: Uuid,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderPaid {
    pub order_id: Uuid,
    pub version: i64,
    pub payment_id: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderCancelled {
    pub order_id: Uuid,
    pub version: i64,
    pub reason: Option<String>,
}

/// Order Submitted - carries the items handed over to fulfillment
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderSubmitted {
    pub order_id: Uuid,
    pub version: i64,
    pub items: Vec<ProductItem>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderCompleted {
    pub order_id: Uuid,
    pub version: i64,
    pub completed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_tag_parses_back() {
        for event_type in EventType::ALL {
            assert_eq!(EventType::from_tag(event_type.as_str()), Some(event_type));
        }
    }

    #[test]
    fn test_unknown_tag_is_rejected() {
        assert_eq!(EventType::from_tag("OrderShipped"), None);
        assert_eq!(EventType::from_tag("orderpaid"), None);
    }

    #[test]
    fn test_event_reports_its_type_and_version() {
        let event = OrderEvent::OrderPaid(OrderPaid {
            order_id: Uuid::new_v4(),
            version: 2,
            payment_id: "pay-1".to_string(),
        });

        assert_eq!(event.event_type(), EventType::OrderPaid);
        assert_eq!(event.version(), 2);

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "OrderPaid");
        assert_eq!(json["data"]["payment_id"], "pay-1");
    }
}

use serde::{Deserialize, Serialize};

use crate::domain::order::EventType;
use super::RelayError;

// ============================================================================
// Event Router - event type tag -> topic
// ============================================================================

/// One topic per event type. Adding an [`EventType`] variant fails to compile
/// until it gets a field here and an arm in [`TopicsConfig::topic`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicsConfig {
    pub order_created: String,
    pub product_item_added: String,
    pub product_item_removed: String,
    pub order_paid: String,
    pub order_cancelled: String,
    pub order_submitted: String,
    pub order_completed: String,
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            order_created: "order-created".to_string(),
            product_item_added: "product-item-added".to_string(),
            product_item_removed: "product-item-removed".to_string(),
            order_paid: "order-paid".to_string(),
            order_cancelled: "order-cancelled".to_string(),
            order_submitted: "order-submitted".to_string(),
            order_completed: "order-completed".to_string(),
        }
    }
}

impl TopicsConfig {
    pub fn topic(&self, event_type: EventType) -> &str {
        match event_type {
            EventType::OrderCreated => &self.order_created,
            EventType::ProductItemAdded => &self.product_item_added,
            EventType::ProductItemRemoved => &self.product_item_removed,
            EventType::OrderPaid => &self.order_paid,
            EventType::OrderCancelled => &self.order_cancelled,
            EventType::OrderSubmitted => &self.order_submitted,
            EventType::OrderCompleted => &self.order_completed,
        }
    }

    /// Event types whose topic name is blank.
    pub fn unmapped(&self) -> Vec<EventType> {
        EventType::ALL
            .into_iter()
            .filter(|t| self.topic(*t).trim().is_empty())
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct EventRouter {
    topics: TopicsConfig,
}

impl EventRouter {
    pub fn new(topics: TopicsConfig) -> Self {
        Self { topics }
    }

    /// Resolve the destination for a persisted event type tag.
    ///
    /// Unknown tags fail with [`RelayError::UnknownEventType`]; that is a
    /// deployment defect, not something a retry will fix.
    pub fn route_for(&self, tag: &str) -> Result<&str, RelayError> {
        let event_type = EventType::from_tag(tag)
            .ok_or_else(|| RelayError::UnknownEventType(tag.to_string()))?;

        let topic = self.topics.topic(event_type);
        if topic.trim().is_empty() {
            return Err(RelayError::UnknownEventType(tag.to_string()));
        }
        Ok(topic)
    }
}

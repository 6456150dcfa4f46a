use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::order::{EventType, Order, OrderEvent};
use super::record::OutboxRecord;

// ============================================================================
// Envelope Builder - aggregate + event -> outbox record
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Failed to serialize event payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Turns an event payload into the opaque bytes stored in the outbox.
pub trait Codec: Send + Sync {
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CodecError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(value)?)
    }
}

#[derive(Debug, Clone, Default)]
pub struct EnvelopeBuilder<C: Codec = JsonCodec> {
    codec: C,
}

impl<C: Codec> EnvelopeBuilder<C> {
    pub fn new(codec: C) -> Self {
        Self { codec }
    }

    /// Build an unsaved record. Only `created_at` depends on anything other
    /// than the arguments.
    pub fn build<T: Serialize + ?Sized>(
        &self,
        aggregate_id: Uuid,
        version: i64,
        event_type: EventType,
        payload: &T,
    ) -> Result<OutboxRecord, CodecError> {
        Ok(OutboxRecord {
            event_id: None,
            aggregate_id,
            event_type: event_type.as_str().to_string(),
            payload: self.codec.serialize(payload)?,
            version,
            created_at: Utc::now(),
            attempts: 0,
        })
    }

    pub fn build_for(&self, order: &Order, event: &OrderEvent) -> Result<OutboxRecord, CodecError> {
        self.build(order.id, order.version, event.event_type(), event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::{OrderCommand, ProductItem};

    #[test]
    fn test_build_stamps_record_fields() {
        let builder = EnvelopeBuilder::new(JsonCodec);
        let aggregate_id = Uuid::new_v4();

        let record = builder
            .build(aggregate_id, 3, EventType::OrderSubmitted, &serde_json::json!({"k": "v"}))
            .unwrap();

        assert_eq!(record.event_id, None);
        assert_eq!(record.aggregate_id, aggregate_id);
        assert_eq!(record.version, 3);
        assert_eq!(record.event_type, "OrderSubmitted");
        assert_eq!(record.payload, br#"{"k":"v"}"#.to_vec());
    }

    #[test]
    fn test_build_for_uses_post_mutation_version() {
        let builder = EnvelopeBuilder::<JsonCodec>::default();
        let mut order = Order::draft(Uuid::new_v4());
        let event = order
            .handle_command(&OrderCommand::CreateOrder {
                customer_id: Uuid::new_v4(),
                delivery_address: "2 Side St".to_string(),
                items: vec![ProductItem::new("Desk", 25_000, 1)],
            })
            .unwrap();
        order.apply_event(&event);

        let record = builder.build_for(&order, &event).unwrap();

        assert_eq!(record.version, 1);
        assert_eq!(record.event_type, "OrderCreated");
        let decoded: OrderEvent = serde_json::from_slice(&record.payload).unwrap();
        assert_eq!(decoded, event);
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A pending integration event, written in the same transaction as the
/// aggregate change it describes.
///
/// `event_id` is `None` until the store has inserted the record. The event
/// itself never changes after insert; the store only counts failed publish
/// `attempts` and reschedules the row. The relay deletes it once published.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OutboxRecord {
    pub event_id: Option<Uuid>,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub payload: Vec<u8>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub attempts: i32,
}

impl OutboxRecord {
    /// Broker headers carried next to the payload.
    pub fn headers(&self) -> Vec<(String, String)> {
        let mut headers = Vec::with_capacity(5);
        if let Some(event_id) = self.event_id {
            headers.push(("event_id".to_string(), event_id.to_string()));
        }
        headers.push(("event_type".to_string(), self.event_type.clone()));
        headers.push(("aggregate_id".to_string(), self.aggregate_id.to_string()));
        headers.push(("version".to_string(), self.version.to_string()));
        headers.push(("created_at".to_string(), self.created_at.to_rfc3339()));
        headers
    }

    /// Partition key; keeps one aggregate's events on one ordered partition.
    pub fn partition_key(&self) -> String {
        self.aggregate_id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_include_identity_and_version() {
        let record = OutboxRecord {
            event_id: Some(Uuid::new_v4()),
            aggregate_id: Uuid::new_v4(),
            event_type: "OrderPaid".to_string(),
            payload: b"{}".to_vec(),
            version: 7,
            created_at: Utc::now(),
            attempts: 0,
        };

        let headers = record.headers();
        let get = |key: &str| {
            headers
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
        };

        assert_eq!(get("event_id"), record.event_id.map(|id| id.to_string()));
        assert_eq!(get("event_type").as_deref(), Some("OrderPaid"));
        assert_eq!(get("version").as_deref(), Some("7"));
        assert_eq!(record.partition_key(), record.aggregate_id.to_string());
    }

    #[test]
    fn test_headers_skip_missing_event_id() {
        let record = OutboxRecord {
            event_id: None,
            aggregate_id: Uuid::new_v4(),
            event_type: "OrderCreated".to_string(),
            payload: vec![],
            version: 1,
            created_at: Utc::now(),
            attempts: 0,
        };

        assert!(record.headers().iter().all(|(k, _)| k != "event_id"));
    }
}

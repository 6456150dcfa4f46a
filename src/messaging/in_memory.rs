use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{DeliveryReceipt, EventPublisher, PublishError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub destination: String,
    pub key: String,
    pub payload: Vec<u8>,
    pub headers: Vec<(String, String)>,
}

impl PublishedMessage {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Default)]
struct PublisherState {
    published: Vec<PublishedMessage>,
    attempts: usize,
    failures_remaining: usize,
    fail_always: bool,
    latency: Option<Duration>,
}

/// Broker stand-in that keeps everything it accepts. Used when no Kafka
/// brokers are configured and throughout the tests, where failures and slow
/// acknowledgements can be scripted.
#[derive(Default)]
pub struct InMemoryPublisher {
    state: Mutex<PublisherState>,
}

impl InMemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next `n` publish attempts.
    pub fn fail_next(&self, n: usize) {
        self.lock().failures_remaining = n;
    }

    pub fn set_fail_always(&self, fail: bool) {
        self.lock().fail_always = fail;
    }

    /// Delay every acknowledgement, e.g. to trip the relay's publish timeout.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.lock().latency = latency;
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.lock().published.clone()
    }

    pub fn published_to(&self, destination: &str) -> Vec<PublishedMessage> {
        self.lock()
            .published
            .iter()
            .filter(|m| m.destination == destination)
            .cloned()
            .collect()
    }

    pub fn attempts(&self) -> usize {
        self.lock().attempts
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PublisherState> {
        // A panic while holding this lock can only come from a test assertion.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl EventPublisher for InMemoryPublisher {
    async fn publish(
        &self,
        destination: &str,
        key: &str,
        payload: &[u8],
        headers: &[(String, String)],
    ) -> Result<DeliveryReceipt, PublishError> {
        let latency = {
            let mut state = self.lock();
            state.attempts += 1;
            state.latency
        };

        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.lock();
        if state.fail_always || state.failures_remaining > 0 {
            state.failures_remaining = state.failures_remaining.saturating_sub(1);
            return Err(PublishError::Broker {
                destination: destination.to_string(),
                reason: "broker unavailable".to_string(),
            });
        }

        state.published.push(PublishedMessage {
            destination: destination.to_string(),
            key: key.to_string(),
            payload: payload.to_vec(),
            headers: headers.to_vec(),
        });
        let offset = state.published.len() as i64 - 1;

        Ok(DeliveryReceipt {
            destination: destination.to_string(),
            partition: Some(0),
            offset: Some(offset),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_accepted_messages() {
        let publisher = InMemoryPublisher::new();
        let headers = vec![("event_type".to_string(), "OrderPaid".to_string())];

        let receipt = publisher
            .publish("order-paid", "key-1", b"payload", &headers)
            .await
            .unwrap();

        assert_eq!(receipt.offset, Some(0));
        let published = publisher.published_to("order-paid");
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].key, "key-1");
        assert_eq!(published[0].header("event_type"), Some("OrderPaid"));
    }

    #[tokio::test]
    async fn test_scripted_failures_then_success() {
        let publisher = InMemoryPublisher::new();
        publisher.fail_next(2);

        assert!(publisher.publish("t", "k", b"1", &[]).await.is_err());
        assert!(publisher.publish("t", "k", b"1", &[]).await.is_err());
        assert!(publisher.publish("t", "k", b"1", &[]).await.is_ok());

        assert_eq!(publisher.attempts(), 3);
        assert_eq!(publisher.published().len(), 1);
    }

    #[tokio::test]
    async fn test_fail_always_until_cleared() {
        let publisher = InMemoryPublisher::new();
        publisher.set_fail_always(true);
        assert!(matches!(
            publisher.publish("t", "k", b"", &[]).await,
            Err(PublishError::Broker { .. })
        ));

        publisher.set_fail_always(false);
        assert!(publisher.publish("t", "k", b"", &[]).await.is_ok());
    }
}

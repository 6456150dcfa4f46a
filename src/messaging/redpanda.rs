use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;
use rdkafka::{
    config::ClientConfig,
    message::{Header, OwnedHeaders},
    producer::{FutureProducer, FutureRecord},
    util::Timeout,
};

use super::{DeliveryReceipt, EventPublisher, PublishError};
use crate::utils::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState};

/// Time the producer gets for one send when the caller waits `publish_timeout`.
///
/// Kept below the caller's budget so a slow broker fails inside the circuit
/// breaker, instead of the call being dropped before the breaker sees it.
fn send_budget(publish_timeout: Duration) -> Duration {
    publish_timeout.saturating_sub(publish_timeout / 10)
}

/// Kafka-compatible producer guarded by a circuit breaker.
pub struct RedpandaClient {
    producer: FutureProducer,
    circuit_breaker: CircuitBreaker,
    send_timeout: Duration,
}

impl RedpandaClient {
    /// `publish_timeout` is the relay's budget per publish; sends are cut
    /// off a little earlier so the breaker sees slow sends.
    pub fn new(brokers: &str, publish_timeout: Duration) -> anyhow::Result<Self> {
        let send_timeout = send_budget(publish_timeout);
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", send_timeout.as_millis().max(1).to_string())
            .set("enable.idempotence", "true")
            .set("acks", "all")
            .create()
            .map_err(|e| anyhow::anyhow!("Failed to create Redpanda producer: {}", e))?;

        let cb_config = CircuitBreakerConfig {
            failure_threshold: 5,
            open_for: Duration::from_secs(30),
            success_threshold: 3,
        };

        Ok(Self {
            producer,
            circuit_breaker: CircuitBreaker::new(cb_config),
            send_timeout,
        })
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.circuit_breaker.state()
    }

}

#[async_trait]
impl EventPublisher for RedpandaClient {
    async fn publish(
        &self,
        destination: &str,
        key: &str,
        payload: &[u8],
        headers: &[(String, String)],
    ) -> Result<DeliveryReceipt, PublishError> {
        let result = self
            .circuit_breaker
            .call(async {
                let kafka_headers = headers.iter().fold(
                    OwnedHeaders::new_with_capacity(headers.len()),
                    |acc, (name, value)| {
                        acc.insert(Header {
                            key: name.as_str(),
                            value: Some(value.as_bytes()),
                        })
                    },
                );

                let record = FutureRecord::to(destination)
                    .key(key)
                    .payload(payload)
                    .headers(kafka_headers);

                // message.timeout.ms bounds delivery, this bounds queueing plus delivery
                timeout(
                    self.send_timeout,
                    self.producer.send(record, Timeout::After(self.send_timeout)),
                )
                .await
                .map_err(|_| PublishError::Timeout(self.send_timeout))?
                .map_err(|(e, _)| PublishError::Broker {
                    destination: destination.to_string(),
                    reason: e.to_string(),
                })
            })
            .await;

        match result {
            Ok(delivery) => {
                tracing::debug!(
                    topic = %destination,
                    key = %key,
                    partition = delivery.partition,
                    offset = delivery.offset,
                    "Published to Redpanda"
                );
                Ok(DeliveryReceipt {
                    destination: destination.to_string(),
                    partition: Some(delivery.partition),
                    offset: Some(delivery.offset),
                })
            }
            Err(CircuitBreakerError::CircuitOpen) => {
                tracing::error!(
                    topic = %destination,
                    "Circuit breaker open - Redpanda unavailable"
                );
                Err(PublishError::CircuitOpen)
            }
            Err(CircuitBreakerError::OperationFailed(e)) => {
                tracing::error!(
                    error = %e,
                    topic = %destination,
                    "Failed to publish to Redpanda"
                );
                Err(e)
            }
        }
    }

    fn breaker_state(&self) -> Option<CircuitState> {
        Some(self.circuit_state())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_budget_stays_below_publish_timeout() {
        assert_eq!(send_budget(Duration::from_secs(5)), Duration::from_millis(4500));
        assert_eq!(send_budget(Duration::from_millis(500)), Duration::from_millis(450));
        assert!(send_budget(Duration::from_millis(1)) <= Duration::from_millis(1));
        assert_eq!(send_budget(Duration::ZERO), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_unreachable_broker_counts_as_breaker_failure() {
        // Nothing listens on port 1; the send can only time out or fail.
        let publish_timeout = Duration::from_secs(1);
        let client = RedpandaClient::new("127.0.0.1:1", publish_timeout).unwrap();

        let started = std::time::Instant::now();
        let result = client.publish("orders", "key", b"{}", &[]).await;
        assert!(result.is_err());
        assert!(started.elapsed() < publish_timeout);
        assert_eq!(client.circuit_breaker.consecutive_failures(), 1);
    }

    #[tokio::test]
    #[ignore = "requires KAFKA_BROKERS"]
    async fn test_receipt_carries_partition_and_offset() {
        let brokers = std::env::var("KAFKA_BROKERS").expect("KAFKA_BROKERS must be set for ignored tests");
        let client = RedpandaClient::new(&brokers, Duration::from_secs(10)).unwrap();

        let headers = [("event_id".to_string(), "receipt-test".to_string())];
        let receipt = client.publish("orders-outbox-test", "key", b"{}", &headers).await.unwrap();

        assert_eq!(receipt.destination, "orders-outbox-test");
        assert!(receipt.partition.is_some_and(|p| p >= 0));
        assert!(receipt.offset.is_some_and(|o| o >= 0));
    }
}

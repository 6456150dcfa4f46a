// ============================================================================
// Messaging - broker clients used by the outbox relay
// ============================================================================

mod in_memory;
mod redpanda;

use std::time::Duration;

use async_trait::async_trait;

use crate::utils::CircuitState;

pub use in_memory::{InMemoryPublisher, PublishedMessage};
pub use redpanda::RedpandaClient;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PublishError {
    #[error("Publish timed out after {0:?}")]
    Timeout(Duration),

    #[error("Broker rejected publish to '{destination}': {reason}")]
    Broker { destination: String, reason: String },

    #[error("Circuit breaker open - broker unavailable")]
    CircuitOpen,
}

/// Broker acknowledgement for a published message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub destination: String,
    pub partition: Option<i32>,
    pub offset: Option<i64>,
}

/// Publishes one keyed message. Transport failures and broker-side negative
/// acknowledgements both come back as `Err`.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(
        &self,
        destination: &str,
        key: &str,
        payload: &[u8],
        headers: &[(String, String)],
    ) -> Result<DeliveryReceipt, PublishError>;

    /// Circuit breaker state, for publishers that have one.
    fn breaker_state(&self) -> Option<CircuitState> {
        None
    }
}

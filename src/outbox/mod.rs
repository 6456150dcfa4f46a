// ============================================================================
// Transactional Outbox
// ============================================================================
//
// record   - the persisted event row
// envelope - builds records from aggregate changes
// router   - event type tag -> destination topic
// relay    - publish-then-delete, single record and batch sweep
//
// ============================================================================

mod envelope;
mod record;
mod relay;
mod router;

use crate::messaging::PublishError;
use crate::store::StoreError;

pub use envelope::{Codec, CodecError, EnvelopeBuilder, JsonCodec};
pub use record::OutboxRecord;
pub use relay::{OutboxRelay, PublishOutcome, RelayConfig, SweepReport};
pub use router::{EventRouter, TopicsConfig};

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("No destination for event type '{0}'")]
    UnknownEventType(String),

    #[error("Publish failed: {0}")]
    Publish(#[from] PublishError),

    #[error("Outbox store error: {0}")]
    Store(#[from] StoreError),
}

impl RelayError {
    /// Whether a later attempt can succeed without a deployment change.
    pub fn is_transient(&self) -> bool {
        !matches!(self, RelayError::UnknownEventType(_))
    }

    /// Short label for the failure metric.
    pub fn reason(&self) -> &'static str {
        match self {
            RelayError::UnknownEventType(_) => "unknown_event_type",
            RelayError::Publish(PublishError::Timeout(_)) => "timeout",
            RelayError::Publish(PublishError::CircuitOpen) => "circuit_open",
            RelayError::Publish(PublishError::Broker { .. }) => "broker",
            RelayError::Store(_) => "store",
        }
    }
}

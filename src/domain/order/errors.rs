use uuid::Uuid;

use super::value_objects::OrderStatus;

// ============================================================================
// Order Business Rule Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OrderError {
    #[error("Order is already cancelled")]
    AlreadyCancelled,

    #[error("Order is already paid")]
    AlreadyPaid,

    #[error("Order must be paid before it is submitted")]
    NotPaid,

    #[error("Order must be submitted before it is completed")]
    NotSubmitted,

    #[error("Cannot {action} order in status: {status}")]
    InvalidStatusTransition {
        action: &'static str,
        status: OrderStatus,
    },

    #[error("Order items cannot be empty")]
    EmptyItems,

    #[error("Invalid item quantity: {0}")]
    InvalidQuantity(i32),

    #[error("Product item {0} is not part of the order")]
    ItemNotFound(Uuid),

    #[error("Product item {0} is already part of the order")]
    DuplicateItem(Uuid),

    #[error("Payment id cannot be empty")]
    MissingPaymentId,
}

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Order Value Objects
// ============================================================================

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ProductItem {
    pub id: Uuid,
    pub title: String,
    pub price_cents: i64,
    pub quantity: i32,
}

impl ProductItem {
    pub fn new(title: impl Into<String>, price_cents: i64, quantity: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            price_cents,
            quantity,
        }
    }

    /// Line total, saturating at `i64::MAX` rather than wrapping.
    pub fn total_cents(&self) -> i64 {
        self.price_cents.saturating_mul(i64::from(self.quantity))
    }
}

/// Lifecycle of an order. `New` only exists in memory before the first save.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    New,
    Created,
    Paid,
    Submitted,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Created => "created",
            Self::Paid => "paid",
            Self::Submitted => "submitted",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new" => Some(Self::New),
            "created" => Some(Self::Created),
            "paid" => Some(Self::Paid),
            "submitted" => Some(Self::Submitted),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_product_item_total() {
        let item = ProductItem::new("Keyboard", 4_999, 3);
        assert_eq!(item.total_cents(), 14_997);
    }

    #[test]
    fn test_product_item_total_saturates() {
        let item = ProductItem::new("Gold bar", i64::MAX / 2, 3);
        assert_eq!(item.total_cents(), i64::MAX);
    }

    #[test]
    fn test_product_items_get_distinct_ids() {
        let a = ProductItem::new("Mouse", 1_000, 1);
        let b = ProductItem::new("Mouse", 1_000, 1);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_status_storage_names() {
        let statuses = [
            OrderStatus::New,
            OrderStatus::Created,
            OrderStatus::Paid,
            OrderStatus::Submitted,
            OrderStatus::Completed,
            OrderStatus::Cancelled,
        ];

        for status in statuses {
            assert_eq!(OrderStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(OrderStatus::parse("shipped"), None);
    }
}

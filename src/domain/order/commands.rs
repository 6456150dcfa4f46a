use uuid::Uuid;

use super::value_objects::ProductItem;

// ============================================================================
// Order Commands - Represent user intent
// ============================================================================

#[derive(Debug, Clone)]
pub enum OrderCommand {
    CreateOrder {
        customer_id: Uuid,
        delivery_address: String,
        items: Vec<ProductItem>,
    },
    AddProductItem {
        item: ProductItem,
    },
    RemoveProductItem {
        item_id: Uuid,
    },
    Pay {
        payment_id: String,
    },
    Cancel {
        reason: Option<String>,
    },
    Submit,
    Complete,
}

impl OrderCommand {
    pub fn is_create(&self) -> bool {
        matches!(self, Self::CreateOrder { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateOrder { .. } => "create",
            Self::AddProductItem { .. } => "add_product_item",
            Self::RemoveProductItem { .. } => "remove_product_item",
            Self::Pay { .. } => "pay",
            Self::Cancel { .. } => "cancel",
            Self::Submit => "submit",
            Self::Complete => "complete",
        }
    }
}

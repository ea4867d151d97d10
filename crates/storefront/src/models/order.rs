//! Order and order item rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cloud_kitchen_core::{MenuItemId, MerchantId, OrderId, OrderStatus, Price, UserId};

/// An order about to be written (`orders` insert body).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewOrder {
    /// `None` for guest orders.
    pub customer_id: Option<UserId>,
    pub restaurant_id: MerchantId,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: String,
    pub status: OrderStatus,
    /// Subtotal plus delivery fee.
    pub total_amount: Price,
    pub delivery_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub special_instructions: Option<String>,
}

impl NewOrder {
    /// Build the stored representation of this order.
    #[must_use]
    pub fn into_record(self, id: OrderId, created_at: DateTime<Utc>) -> OrderRecord {
        OrderRecord {
            id,
            customer_id: self.customer_id,
            restaurant_id: Some(self.restaurant_id),
            customer_name: self.customer_name,
            customer_email: self.customer_email,
            customer_phone: self.customer_phone,
            status: self.status,
            total_amount: self.total_amount,
            delivery_address: self.delivery_address,
            special_instructions: self.special_instructions,
            is_read: false,
            created_at,
        }
    }
}

/// A line snapshot written to `order_items`.
///
/// Name and price are copied so later menu edits do not rewrite history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrderItem {
    pub order_id: OrderId,
    pub menu_item_id: MenuItemId,
    pub item_name: String,
    pub price: Price,
    pub quantity: u32,
}

/// An order as returned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: OrderId,
    #[serde(default)]
    pub customer_id: Option<UserId>,
    #[serde(default)]
    pub restaurant_id: Option<MerchantId>,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: String,
    pub status: OrderStatus,
    pub total_amount: Price,
    pub delivery_address: String,
    #[serde(default)]
    pub special_instructions: Option<String>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_guest_order_serializes_null_customer() {
        let order = NewOrder {
            customer_id: None,
            restaurant_id: MerchantId::random(),
            customer_name: "Jane".to_string(),
            customer_email: "jane@x.com".to_string(),
            customer_phone: "+15551234567".to_string(),
            status: OrderStatus::Pending,
            total_amount: Price::from_cents(2297),
            delivery_address: "1 Long Street, Springfield".to_string(),
            special_instructions: None,
        };

        let json = serde_json::to_value(&order).unwrap();
        assert!(json["customer_id"].is_null());
        assert_eq!(json["status"], "pending");
        assert!(json.get("special_instructions").is_none());
    }

    #[test]
    fn test_record_accepts_numeric_total() {
        let json = r#"{
            "id": "00000000-0000-0000-0000-0000000000aa",
            "customer_id": null,
            "customer_name": "Jane",
            "customer_email": "jane@x.com",
            "customer_phone": "+15551234567",
            "status": "pending",
            "total_amount": 22.97,
            "delivery_address": "1 Long Street, Springfield",
            "created_at": "2026-01-01T12:00:00Z"
        }"#;
        let record: OrderRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.total_amount, Price::from_cents(2297));
        assert!(!record.is_read);
    }
}

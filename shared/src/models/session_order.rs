//! Session Order Model

use serde::{Deserialize, Serialize};

use crate::sync::{EntityKind, SyncEntity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Created, not yet sent to the kitchen
    Pending,
    /// Confirmed by the server, stock has been taken
    Confirmed,
    Cancelled,
}

/// One line of an order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: String,
    pub quantity: i32,
    /// Price in cents at the time of ordering
    pub unit_price: i64,
}

impl OrderItem {
    pub fn line_total(&self) -> i64 {
        self.unit_price * i64::from(self.quantity)
    }
}

/// An order placed against a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionOrder {
    pub id: String,
    pub session_id: String,
    pub items: Vec<OrderItem>,
    pub status: OrderStatus,
    pub created_at: i64,
    #[serde(default)]
    pub confirmed_at: Option<i64>,
}

impl SessionOrder {
    /// Order total in cents
    pub fn total(&self) -> i64 {
        self.items.iter().map(OrderItem::line_total).sum()
    }

    pub fn confirm(&mut self, at: i64) {
        self.status = OrderStatus::Confirmed;
        self.confirmed_at.get_or_insert(at);
    }
}

/// Create order payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionOrderCreate {
    pub session_id: String,
    pub items: Vec<OrderItem>,
    /// Client reference used by the server to deduplicate replays
    pub client_ref: String,
}

impl SyncEntity for SessionOrder {
    const KIND: EntityKind = EntityKind::SessionOrder;

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_total() {
        let order = SessionOrder {
            id: "o1".into(),
            session_id: "s1".into(),
            items: vec![
                OrderItem { product_id: "p1".into(), quantity: 2, unit_price: 350 },
                OrderItem { product_id: "p2".into(), quantity: 1, unit_price: 1200 },
            ],
            status: OrderStatus::Pending,
            created_at: 0,
            confirmed_at: None,
        };
        assert_eq!(order.total(), 1900);
    }

    #[test]
    fn test_confirm_keeps_first_timestamp() {
        let mut order = SessionOrder {
            id: "o1".into(),
            session_id: "s1".into(),
            items: vec![],
            status: OrderStatus::Pending,
            created_at: 0,
            confirmed_at: None,
        };
        order.confirm(10);
        order.confirm(20);
        assert_eq!(order.status, OrderStatus::Confirmed);
        assert_eq!(order.confirmed_at, Some(10));
    }
}

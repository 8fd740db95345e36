//! Product Model

use serde::{Deserialize, Serialize};

use crate::sync::{EntityKind, SyncEntity};

/// Product entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    /// Category reference (String ID)
    pub category_id: Option<String>,
    /// Price in cents
    pub price: i64,
    /// Tax rate in percentage (e.g., 10 = 10%)
    #[serde(default)]
    pub tax_rate: i32,
    /// Units on hand, `None` when the product is not stock tracked.
    /// The server value always replaces the cached one.
    #[serde(default)]
    pub current_stock: Option<i64>,
    #[serde(default)]
    pub sort_order: i32,
    pub is_active: bool,
}

impl Product {
    pub fn tracks_stock(&self) -> bool {
        self.current_stock.is_some()
    }
}

impl SyncEntity for Product {
    const KIND: EntityKind = EntityKind::Product;

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }
}

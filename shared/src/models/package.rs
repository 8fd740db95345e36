//! Package Model (套餐)

use serde::{Deserialize, Serialize};

use crate::sync::{EntityKind, SyncEntity};

/// A fixed bundle of products sold at one price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Package {
    pub id: String,
    pub name: String,
    /// Price in cents
    pub price: i64,
    #[serde(default)]
    pub items: Vec<PackageItem>,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageItem {
    pub product_id: String,
    pub quantity: i32,
}

impl SyncEntity for Package {
    const KIND: EntityKind = EntityKind::Package;

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }
}

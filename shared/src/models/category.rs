//! Category Model

use serde::{Deserialize, Serialize};

use crate::sync::{EntityKind, SyncEntity};

/// Category entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub sort_order: i32,
    pub is_active: bool,
    /// Whether this category is visible in the POS display
    #[serde(default = "default_true")]
    pub is_display: bool,
}

fn default_true() -> bool {
    true
}

impl SyncEntity for Category {
    const KIND: EntityKind = EntityKind::Category;

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }
}

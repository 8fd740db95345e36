//! Dining Table Model

use serde::{Deserialize, Serialize};

use crate::sync::{EntityKind, SyncEntity};

/// Dining table entity (桌台)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiningTable {
    pub id: String,
    pub name: String,
    pub zone: Option<String>,
    #[serde(default)]
    pub capacity: i32,
    pub is_active: bool,
}

impl SyncEntity for DiningTable {
    const KIND: EntityKind = EntityKind::DiningTable;

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }
}

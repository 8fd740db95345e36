//! Session Model
//!
//! A session is a running bill (tab) that collects orders until it is
//! closed and paid.

use serde::{Deserialize, Serialize};

use crate::sync::{EntityKind, SyncEntity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Open,
    Closed,
}

/// Session entity (开台)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    /// Dining table reference, `None` for takeaway tabs
    pub table_id: Option<String>,
    #[serde(default)]
    pub guest_count: i32,
    pub status: SessionStatus,
    pub opened_at: i64,
    #[serde(default)]
    pub closed_at: Option<i64>,
}

impl Session {
    pub fn is_open(&self) -> bool {
        self.status == SessionStatus::Open
    }

    pub fn close(&mut self, at: i64) {
        self.status = SessionStatus::Closed;
        self.closed_at.get_or_insert(at);
    }
}

/// Create session payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionCreate {
    pub table_id: Option<String>,
    pub guest_count: i32,
    /// Client reference used by the server to deduplicate replays
    pub client_ref: String,
}

impl SyncEntity for Session {
    const KIND: EntityKind = EntityKind::Session;

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }
}

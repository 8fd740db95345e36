//! Sync envelope types
//!
//! Cached rows are stored as [`Cached<T>`]: the domain entity untouched, plus
//! a [`SyncState`] describing where the local copy stands relative to the
//! server. Sync bookkeeping never leaks into the domain structs.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::util;

/// Entity types mirrored in the local cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Product,
    Category,
    Package,
    DiningTable,
    Session,
    SessionOrder,
}

impl EntityKind {
    pub const ALL: [EntityKind; 6] = [
        EntityKind::Product,
        EntityKind::Category,
        EntityKind::Package,
        EntityKind::DiningTable,
        EntityKind::Session,
        EntityKind::SessionOrder,
    ];

    /// Resource name used in backend URLs and as the local table name
    pub const fn resource(&self) -> &'static str {
        match self {
            EntityKind::Product => "products",
            EntityKind::Category => "categories",
            EntityKind::Package => "packages",
            EntityKind::DiningTable => "dining_tables",
            EntityKind::Session => "sessions",
            EntityKind::SessionOrder => "session_orders",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.resource())
    }
}

/// A domain entity that lives in the local cache
pub trait SyncEntity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const KIND: EntityKind;

    fn id(&self) -> &str;

    fn set_id(&mut self, id: String);
}

/// Sync bookkeeping for one cached row
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    /// Server modification time of the row this copy came from (0 for rows
    /// that only exist locally)
    pub last_modified: i64,
    /// Local changes not yet confirmed by the server
    #[serde(default)]
    pub pending: bool,
    /// Temporary id the row was created under while offline
    #[serde(default)]
    pub temp_id: Option<String>,
    /// Server id assigned once the create mutation succeeded
    #[serde(default)]
    pub server_id: Option<String>,
    /// Last sync failure that needed operator attention
    #[serde(default)]
    pub error: Option<String>,
}

impl SyncState {
    /// State of a row freshly written from the server
    pub fn synced(last_modified: i64) -> Self {
        Self {
            last_modified,
            ..Default::default()
        }
    }

    /// State of a row created locally under `temp_id`
    pub fn optimistic(temp_id: impl Into<String>) -> Self {
        Self {
            pending: true,
            temp_id: Some(temp_id.into()),
            ..Default::default()
        }
    }

    /// Row still identified by a temporary id
    pub fn is_temporary(&self) -> bool {
        self.temp_id.is_some()
    }

    /// Temp id and resolved server id, if both are known
    pub fn resolved_mapping(&self) -> Option<(&str, &str)> {
        match (&self.temp_id, &self.server_id) {
            (Some(temp), Some(server)) => Some((temp.as_str(), server.as_str())),
            _ => None,
        }
    }

    pub fn badge(&self) -> SyncBadge {
        if self.error.is_some() {
            SyncBadge::Failed
        } else if self.is_temporary() && self.server_id.is_none() {
            SyncBadge::TemporaryId
        } else if self.pending {
            SyncBadge::Pending
        } else {
            SyncBadge::Synced
        }
    }
}

/// Badge rendered next to a cached row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncBadge {
    Synced,
    Pending,
    TemporaryId,
    Failed,
}

/// A cached row: domain entity plus its sync envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cached<T> {
    pub entity: T,
    pub sync: SyncState,
}

impl<T> Cached<T> {
    pub fn new(entity: T, sync: SyncState) -> Self {
        Self { entity, sync }
    }
}

impl<T: SyncEntity> Cached<T> {
    pub fn id(&self) -> &str {
        self.entity.id()
    }
}

/// Reference to a row that may not have a server id yet
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum EntityRef {
    Server(String),
    Temp(String),
}

impl EntityRef {
    /// Classify a raw id by its temporary marker
    pub fn from_id(id: impl Into<String>) -> Self {
        let id = id.into();
        if util::is_temp_id(&id) {
            EntityRef::Temp(id)
        } else {
            EntityRef::Server(id)
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EntityRef::Server(id) | EntityRef::Temp(id) => id,
        }
    }

    pub fn temp_id(&self) -> Option<&str> {
        match self {
            EntityRef::Temp(id) => Some(id),
            EntityRef::Server(_) => None,
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Incremental sync watermark for one entity kind
///
/// Rows are pulled in `(last_modified, id)` order; the id breaks ties between
/// rows sharing a timestamp so no row at a page boundary is skipped.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SyncCursor {
    pub last_modified: i64,
    pub last_id: String,
}

impl SyncCursor {
    pub fn new(last_modified: i64, last_id: impl Into<String>) -> Self {
        Self {
            last_modified,
            last_id: last_id.into(),
        }
    }

    /// Cursor pointing at `row`
    pub fn at(row: &RemoteRow) -> Self {
        Self::new(row.last_modified, row.id.clone())
    }

    /// Whether `row` sorts strictly after this cursor
    pub fn is_before(&self, row: &RemoteRow) -> bool {
        (self.last_modified, self.last_id.as_str()) < (row.last_modified, row.id.as_str())
    }
}

/// A row as returned by the backend's pull endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRow {
    pub id: String,
    pub last_modified: i64,
    /// Soft-deleted on the server; the cached copy is dropped
    #[serde(default)]
    pub deleted: bool,
    pub data: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str, last_modified: i64) -> RemoteRow {
        RemoteRow {
            id: id.into(),
            last_modified,
            deleted: false,
            data: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_cursor_breaks_ties_by_id() {
        let cursor = SyncCursor::new(100, "b");
        assert!(!cursor.is_before(&row("a", 100)));
        assert!(!cursor.is_before(&row("b", 100)));
        assert!(cursor.is_before(&row("c", 100)));
        assert!(cursor.is_before(&row("a", 101)));
        assert!(!cursor.is_before(&row("z", 99)));
    }

    #[test]
    fn test_badge_priority() {
        let mut state = SyncState::optimistic("temp_1");
        assert_eq!(state.badge(), SyncBadge::TemporaryId);

        state.server_id = Some("42".into());
        assert_eq!(state.badge(), SyncBadge::Pending);

        state.pending = false;
        assert_eq!(state.badge(), SyncBadge::Synced);

        state.error = Some("insufficient stock".into());
        assert_eq!(state.badge(), SyncBadge::Failed);
    }

    #[test]
    fn test_entity_ref_from_id() {
        assert_eq!(EntityRef::from_id("42"), EntityRef::Server("42".into()));
        let temp = util::temp_id();
        assert_eq!(EntityRef::from_id(temp.clone()), EntityRef::Temp(temp.clone()));
        assert_eq!(EntityRef::Temp(temp.clone()).temp_id(), Some(temp.as_str()));
    }

    #[test]
    fn test_entity_ref_serde_shape() {
        let json = serde_json::to_value(EntityRef::Server("7".into())).unwrap();
        assert_eq!(json, serde_json::json!({"type": "server", "id": "7"}));
    }

    #[test]
    fn test_resolved_mapping() {
        let mut state = SyncState::optimistic("temp_1");
        assert!(state.resolved_mapping().is_none());
        state.server_id = Some("9".into());
        assert_eq!(state.resolved_mapping(), Some(("temp_1", "9")));
    }
}

//! Temporary id → server id mapping
//!
//! In-memory view over the persisted `temp_id`/`server_id` pairs: the
//! `id_mappings` table plus the sync envelope of temporary rows not yet
//! collected. Mappings outlive their temporary rows, so a temp id handed
//! out before reconciliation keeps resolving. [`IdMap::rebuild`] restores
//! the map after a restart.

use parking_lot::RwLock;
use shared::{EntityKind, EntityRef};
use std::collections::HashMap;

use crate::storage::{LocalStore, StorageResult};

/// Kinds that can be created offline
const CREATABLE_KINDS: [EntityKind; 2] = [EntityKind::Session, EntityKind::SessionOrder];

#[derive(Debug, Default)]
pub struct IdMap {
    inner: RwLock<HashMap<String, String>>,
}

impl IdMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, temp_id: impl Into<String>, server_id: impl Into<String>) {
        self.inner.write().insert(temp_id.into(), server_id.into());
    }

    /// Server id for a temporary id
    pub fn get(&self, temp_id: &str) -> Option<String> {
        self.inner.read().get(temp_id).cloned()
    }

    /// Resolve any raw id: temporary ids map to their server id when known,
    /// everything else resolves to itself
    pub fn resolve(&self, id: &str) -> String {
        self.get(id).unwrap_or_else(|| id.to_string())
    }

    /// Server id a reference points at, `None` while a temp id is unresolved
    pub fn resolve_ref(&self, entity_ref: &EntityRef) -> Option<String> {
        match entity_ref {
            EntityRef::Server(id) => Some(id.clone()),
            EntityRef::Temp(id) => self.get(id),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Reload every persisted mapping from the store
    pub fn rebuild(&self, store: &LocalStore) -> StorageResult<usize> {
        let mut mappings: HashMap<String, String> = store.list_id_mappings()?.into_iter().collect();
        for kind in CREATABLE_KINDS {
            for cached in store.list_raw(kind)? {
                if let Some((temp, server)) = cached.sync.resolved_mapping() {
                    mappings.insert(temp.to_string(), server.to_string());
                }
            }
        }

        let count = mappings.len();
        *self.inner.write() = mappings;
        tracing::debug!(count, "Rebuilt temporary id map");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::models::{Session, SessionStatus};
    use shared::{Cached, SyncState};

    #[test]
    fn test_resolve() {
        let map = IdMap::new();
        map.insert("temp_a", "41");

        assert_eq!(map.resolve("temp_a"), "41");
        assert_eq!(map.resolve("temp_b"), "temp_b");
        assert_eq!(map.resolve("7"), "7");
        assert_eq!(map.resolve_ref(&EntityRef::Temp("temp_a".into())), Some("41".into()));
        assert_eq!(map.resolve_ref(&EntityRef::Temp("temp_b".into())), None);
        assert_eq!(map.resolve_ref(&EntityRef::Server("7".into())), Some("7".into()));
    }

    #[test]
    fn test_rebuild_from_store() {
        let store = LocalStore::open_in_memory().unwrap();

        let mut sync = SyncState::optimistic("temp_s1");
        sync.server_id = Some("100".into());
        let resolved = Cached::new(
            Session {
                id: "temp_s1".into(),
                table_id: None,
                guest_count: 2,
                status: SessionStatus::Open,
                opened_at: 0,
                closed_at: None,
            },
            sync,
        );
        let unresolved = Cached::new(
            Session {
                id: "temp_s2".into(),
                ..resolved.entity.clone()
            },
            SyncState::optimistic("temp_s2"),
        );

        let txn = store.begin_write().unwrap();
        store
            .put_txn(&txn, EntityKind::Session, "temp_s1", &resolved)
            .unwrap();
        store
            .put_txn(&txn, EntityKind::Session, "temp_s2", &unresolved)
            .unwrap();
        txn.commit().unwrap();

        // Row already collected, only the mapping table remembers it
        let txn = store.begin_write().unwrap();
        store.put_id_mapping_txn(&txn, "temp_o1", "200").unwrap();
        txn.commit().unwrap();

        let map = IdMap::new();
        map.insert("stale", "1");
        assert_eq!(map.rebuild(&store).unwrap(), 2);
        assert_eq!(map.get("temp_s1"), Some("100".into()));
        assert_eq!(map.get("temp_o1"), Some("200".into()));
        assert!(map.get("stale").is_none());
        assert!(map.get("temp_s2").is_none());
    }
}

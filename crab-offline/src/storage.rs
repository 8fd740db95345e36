//! redb-based local mirror of the backend
//!
//! # Tables
//!
//! | Table | Key | Value | Purpose |
//! |-------|-----|-------|---------|
//! | `products` … `session_orders` | `id` | `Cached<T>` | One mirror table per [`EntityKind`] |
//! | `mutation_queue` | `seq` | `PendingMutation` | Durable write-behind queue |
//! | `sync_cursors` | `entity kind` | `SyncCursor` | Incremental pull watermark |
//! | `id_mappings` | `temp id` | `server id` | Reconciled temporary ids |
//! | `meta` | `"schema_version"` / `"mutation_seq"` | `u64` | Schema version, queue counter |
//!
//! # Upgrades
//!
//! [`LocalStore::open`] opens every table inside one write transaction, which
//! creates the missing ones, and then stamps [`SCHEMA_VERSION`]. Running it
//! again, or over a file with a wrong version number, converges to the same
//! layout without error.
//!
//! # Missing tables
//!
//! Read paths never assume a table exists: a missing table reads as empty
//! and logs a warning.

use redb::{
    Database, Key, ReadOnlyTable, ReadTransaction, ReadableDatabase, ReadableTable,
    ReadableTableMetadata, TableDefinition, TableError, WriteTransaction,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use shared::models::{Product, SessionOrder};
use shared::{Cached, EntityKind, RemoteRow, SyncCursor, SyncEntity, SyncState};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::mutation::{MutationStatus, PendingMutation};

const PRODUCTS_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new(EntityKind::Product.resource());
const CATEGORIES_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new(EntityKind::Category.resource());
const PACKAGES_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new(EntityKind::Package.resource());
const DINING_TABLES_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new(EntityKind::DiningTable.resource());
const SESSIONS_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new(EntityKind::Session.resource());
const SESSION_ORDERS_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new(EntityKind::SessionOrder.resource());

/// Table for queued mutations: key = seq, value = JSON-serialized PendingMutation
const MUTATION_QUEUE_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("mutation_queue");

/// Table for pull cursors: key = entity kind, value = JSON-serialized SyncCursor
const SYNC_CURSORS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("sync_cursors");

/// Table for reconciled ids: key = temporary id, value = server id
const ID_MAPPINGS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("id_mappings");

const META_TABLE: TableDefinition<&str, u64> = TableDefinition::new("meta");

const SCHEMA_VERSION_KEY: &str = "schema_version";
const MUTATION_SEQ_KEY: &str = "mutation_seq";

/// Bumped whenever a table is added
pub const SCHEMA_VERSION: u64 = 4;

fn entity_table(kind: EntityKind) -> TableDefinition<'static, &'static str, &'static [u8]> {
    match kind {
        EntityKind::Product => PRODUCTS_TABLE,
        EntityKind::Category => CATEGORIES_TABLE,
        EntityKind::Package => PACKAGES_TABLE,
        EntityKind::DiningTable => DINING_TABLES_TABLE,
        EntityKind::Session => SESSIONS_TABLE,
        EntityKind::SessionOrder => SESSION_ORDERS_TABLE,
    }
}

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Rows touched by one pulled page
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageStats {
    pub written: usize,
    pub deleted: usize,
    /// Rows dropped before a full pull's first page
    pub cleared: usize,
}

/// Storage statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub rows: Vec<(EntityKind, u64)>,
    pub queued_mutations: u64,
    pub schema_version: Option<u64>,
}

/// Open a table for reading, `None` when it does not exist
fn open_read<K: Key + 'static, V: redb::Value + 'static>(
    txn: &ReadTransaction,
    def: TableDefinition<K, V>,
) -> StorageResult<Option<ReadOnlyTable<K, V>>> {
    match txn.open_table(def) {
        Ok(table) => Ok(Some(table)),
        Err(TableError::TableDoesNotExist(name)) => {
            tracing::warn!(table = %name, "Local table missing, reading as empty");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Local store backed by redb
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<Database>,
}

impl LocalStore {
    /// Open or create the database at the given path
    ///
    /// redb commits are durable once `commit()` returns, so the queue survives
    /// a crash or power loss between enqueue and replay.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let db = Database::create(path)?;
        Self::init(db)
    }

    /// Open an in-memory database (for tests and ephemeral clients)
    pub fn open_in_memory() -> StorageResult<Self> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        Self::init(db)
    }

    fn init(db: Database) -> StorageResult<Self> {
        let write_txn = db.begin_write()?;
        {
            for kind in EntityKind::ALL {
                let _ = write_txn.open_table(entity_table(kind))?;
            }
            let _ = write_txn.open_table(MUTATION_QUEUE_TABLE)?;
            let _ = write_txn.open_table(SYNC_CURSORS_TABLE)?;
            let _ = write_txn.open_table(ID_MAPPINGS_TABLE)?;

            let mut meta = write_txn.open_table(META_TABLE)?;
            let stored = meta.get(SCHEMA_VERSION_KEY)?.map(|guard| guard.value());
            match stored {
                Some(version) if version == SCHEMA_VERSION => {}
                Some(version) => tracing::warn!(
                    stored = version,
                    current = SCHEMA_VERSION,
                    "Local schema version mismatch, re-applied table layout"
                ),
                None => tracing::info!(version = SCHEMA_VERSION, "Initialized local store"),
            }
            meta.insert(SCHEMA_VERSION_KEY, SCHEMA_VERSION)?;
        }
        write_txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Begin a write transaction
    pub fn begin_write(&self) -> StorageResult<WriteTransaction> {
        Ok(self.db.begin_write()?)
    }

    pub fn schema_version(&self) -> StorageResult<Option<u64>> {
        let read_txn = self.db.begin_read()?;
        let Some(table) = open_read(&read_txn, META_TABLE)? else {
            return Ok(None);
        };
        let version = table.get(SCHEMA_VERSION_KEY)?.map(|guard| guard.value());
        Ok(version)
    }

    // ========== Entity Operations ==========

    /// Get a cached row by id
    pub fn get<T: SyncEntity>(&self, id: &str) -> StorageResult<Option<Cached<T>>> {
        self.get_by_kind(T::KIND, id)
    }

    /// Get a cached row of `kind`, decoded as `T`
    pub fn get_by_kind<T: DeserializeOwned>(
        &self,
        kind: EntityKind,
        id: &str,
    ) -> StorageResult<Option<T>> {
        let read_txn = self.db.begin_read()?;
        let Some(table) = open_read(&read_txn, entity_table(kind))? else {
            return Ok(None);
        };
        let cached = table
            .get(id)?
            .map(|value| serde_json::from_slice(value.value()))
            .transpose()?;
        Ok(cached)
    }

    /// All cached rows of an entity type
    pub fn list<T: SyncEntity>(&self) -> StorageResult<Vec<Cached<T>>> {
        self.scan(T::KIND)
    }

    /// All cached rows of `kind` with the entity left as JSON
    pub fn list_raw(&self, kind: EntityKind) -> StorageResult<Vec<Cached<Value>>> {
        self.scan(kind)
    }

    /// Rows that fail to decode are skipped with a warning
    fn scan<T: DeserializeOwned>(&self, kind: EntityKind) -> StorageResult<Vec<T>> {
        let read_txn = self.db.begin_read()?;
        let Some(table) = open_read(&read_txn, entity_table(kind))? else {
            return Ok(Vec::new());
        };

        let mut rows = Vec::new();
        for result in table.iter()? {
            let (key, value) = result?;
            match serde_json::from_slice(value.value()) {
                Ok(row) => rows.push(row),
                Err(e) => tracing::warn!(
                    kind = %kind,
                    id = key.value(),
                    error = %e,
                    "Skipping undecodable cached row"
                ),
            }
        }
        Ok(rows)
    }

    /// Number of cached rows of `kind`
    pub fn count(&self, kind: EntityKind) -> StorageResult<u64> {
        let read_txn = self.db.begin_read()?;
        match open_read(&read_txn, entity_table(kind))? {
            Some(table) => Ok(table.len()?),
            None => Ok(0),
        }
    }

    /// Get a cached row (within transaction)
    pub fn get_txn<T: DeserializeOwned>(
        &self,
        txn: &WriteTransaction,
        kind: EntityKind,
        id: &str,
    ) -> StorageResult<Option<T>> {
        let table = txn.open_table(entity_table(kind))?;
        let cached = table
            .get(id)?
            .map(|value| serde_json::from_slice(value.value()))
            .transpose()?;
        Ok(cached)
    }

    /// Write a cached row (within transaction)
    pub fn put_txn<T: Serialize>(
        &self,
        txn: &WriteTransaction,
        kind: EntityKind,
        id: &str,
        cached: &Cached<T>,
    ) -> StorageResult<()> {
        let mut table = txn.open_table(entity_table(kind))?;
        let value = serde_json::to_vec(cached)?;
        table.insert(id, value.as_slice())?;
        Ok(())
    }

    /// Remove a cached row (within transaction), returns whether it existed
    pub fn remove_txn(
        &self,
        txn: &WriteTransaction,
        kind: EntityKind,
        id: &str,
    ) -> StorageResult<bool> {
        let mut table = txn.open_table(entity_table(kind))?;
        let existed = table.remove(id)?.is_some();
        Ok(existed)
    }

    /// Read-modify-write a typed row (within transaction)
    ///
    /// Returns `false` when the row does not exist.
    pub fn update_txn<T: SyncEntity>(
        &self,
        txn: &WriteTransaction,
        id: &str,
        f: impl FnOnce(&mut Cached<T>),
    ) -> StorageResult<bool> {
        let Some(mut cached) = self.get_txn::<Cached<T>>(txn, T::KIND, id)? else {
            return Ok(false);
        };
        f(&mut cached);
        self.put_txn(txn, T::KIND, id, &cached)?;
        Ok(true)
    }

    /// Update only the sync envelope of a row of any kind (within transaction)
    pub fn update_sync_txn(
        &self,
        txn: &WriteTransaction,
        kind: EntityKind,
        id: &str,
        f: impl FnOnce(&mut SyncState),
    ) -> StorageResult<bool> {
        let Some(mut cached) = self.get_txn::<Cached<Value>>(txn, kind, id)? else {
            return Ok(false);
        };
        f(&mut cached.sync);
        self.put_txn(txn, kind, id, &cached)?;
        Ok(true)
    }

    /// All rows of `kind` with their keys (within transaction)
    pub fn list_raw_txn(
        &self,
        txn: &WriteTransaction,
        kind: EntityKind,
    ) -> StorageResult<Vec<(String, Cached<Value>)>> {
        let table = txn.open_table(entity_table(kind))?;
        let mut rows = Vec::new();
        for result in table.iter()? {
            let (key, value) = result?;
            rows.push((key.value().to_string(), serde_json::from_slice(value.value())?));
        }
        Ok(rows)
    }

    /// Point cached orders of session `from` at session `to` (within transaction)
    pub fn rewrite_order_session_txn(
        &self,
        txn: &WriteTransaction,
        from: &str,
        to: &str,
    ) -> StorageResult<usize> {
        let mut table = txn.open_table(SESSION_ORDERS_TABLE)?;

        let mut rewritten: Vec<(String, Cached<SessionOrder>)> = Vec::new();
        for result in table.iter()? {
            let (key, value) = result?;
            let mut cached: Cached<SessionOrder> = serde_json::from_slice(value.value())?;
            if cached.entity.session_id == from {
                cached.entity.session_id = to.to_string();
                rewritten.push((key.value().to_string(), cached));
            }
        }

        for (key, cached) in &rewritten {
            let value = serde_json::to_vec(cached)?;
            table.insert(key.as_str(), value.as_slice())?;
        }
        Ok(rewritten.len())
    }

    /// Add `delta` to a product's cached stock (within transaction)
    ///
    /// Products that do not track stock are left untouched. Returns the new
    /// stock value, if any.
    pub fn adjust_stock_txn(
        &self,
        txn: &WriteTransaction,
        product_id: &str,
        delta: i64,
    ) -> StorageResult<Option<i64>> {
        let mut new_stock = None;
        self.update_txn::<Product>(txn, product_id, |cached| {
            if let Some(stock) = cached.entity.current_stock.as_mut() {
                *stock += delta;
                new_stock = Some(*stock);
            }
        })?;
        Ok(new_stock)
    }

    // ========== Pull Operations ==========

    /// Write one pulled page and advance the cursor in the same transaction
    ///
    /// Server rows replace cached rows wholesale. The local bits carried over
    /// are the `pending` flag and the failure message of a row that still has
    /// a queued or failed mutation.
    pub fn apply_pull_page(
        &self,
        kind: EntityKind,
        rows: &[RemoteRow],
        cursor: &SyncCursor,
    ) -> StorageResult<PageStats> {
        let txn = self.begin_write()?;
        let stats = self.write_page_txn(&txn, kind, rows)?;
        self.advance_cursor_txn(&txn, kind, cursor)?;
        txn.commit()?;
        Ok(stats)
    }

    /// First page of a full pull: drop the server-owned rows and the cursor
    /// of `kind`, then write the page, all in one transaction
    ///
    /// `cursor` is `None` when the server returned no rows at all. Rows with
    /// unsynced local state survive the clear.
    pub fn replace_with_page(
        &self,
        kind: EntityKind,
        rows: &[RemoteRow],
        cursor: Option<&SyncCursor>,
    ) -> StorageResult<PageStats> {
        let txn = self.begin_write()?;
        let cleared = self.clear_entities_txn(&txn, kind, true)?;
        self.clear_cursor_txn(&txn, kind)?;
        let mut stats = self.write_page_txn(&txn, kind, rows)?;
        if let Some(cursor) = cursor {
            self.advance_cursor_txn(&txn, kind, cursor)?;
        }
        txn.commit()?;
        stats.cleared = cleared;
        Ok(stats)
    }

    fn write_page_txn(
        &self,
        txn: &WriteTransaction,
        kind: EntityKind,
        rows: &[RemoteRow],
    ) -> StorageResult<PageStats> {
        let mut stats = PageStats::default();
        let mut table = txn.open_table(entity_table(kind))?;
        for row in rows {
            if row.deleted {
                if table.remove(row.id.as_str())?.is_some() {
                    stats.deleted += 1;
                }
                continue;
            }

            let local = match table.get(row.id.as_str())? {
                Some(value) => serde_json::from_slice::<Cached<Value>>(value.value())
                    .map(|cached| (cached.sync.pending, cached.sync.error))
                    .unwrap_or_default(),
                None => (false, None),
            };

            let mut data = row.data.clone();
            if let Value::Object(map) = &mut data {
                map.insert("id".to_string(), Value::String(row.id.clone()));
            }
            let mut sync = SyncState::synced(row.last_modified);
            (sync.pending, sync.error) = local;

            let value = serde_json::to_vec(&Cached::new(data, sync))?;
            table.insert(row.id.as_str(), value.as_slice())?;
            stats.written += 1;
        }
        Ok(stats)
    }

    /// Remove cached rows of `kind`
    ///
    /// With `preserve_local`, rows carrying unsynced local state (pending
    /// changes or a temporary id) survive. Returns the number removed.
    pub fn clear_entities(&self, kind: EntityKind, preserve_local: bool) -> StorageResult<usize> {
        let txn = self.begin_write()?;
        let removed = self.clear_entities_txn(&txn, kind, preserve_local)?;
        txn.commit()?;
        Ok(removed)
    }

    fn clear_entities_txn(
        &self,
        txn: &WriteTransaction,
        kind: EntityKind,
        preserve_local: bool,
    ) -> StorageResult<usize> {
        let mut table = txn.open_table(entity_table(kind))?;

        // Collect keys first (can't iterate and mutate simultaneously)
        let mut keys_to_remove: Vec<String> = Vec::new();
        for result in table.iter()? {
            let (key, value) = result?;
            let keep = preserve_local
                && serde_json::from_slice::<Cached<Value>>(value.value())
                    .map(|cached| cached.sync.pending || cached.sync.is_temporary())
                    .unwrap_or(false);
            if !keep {
                keys_to_remove.push(key.value().to_string());
            }
        }

        for key in &keys_to_remove {
            table.remove(key.as_str())?;
        }
        Ok(keys_to_remove.len())
    }

    // ========== Cursor Operations ==========

    pub fn get_cursor(&self, kind: EntityKind) -> StorageResult<Option<SyncCursor>> {
        let read_txn = self.db.begin_read()?;
        let Some(table) = open_read(&read_txn, SYNC_CURSORS_TABLE)? else {
            return Ok(None);
        };
        let cursor = table
            .get(kind.resource())?
            .map(|value| serde_json::from_slice(value.value()))
            .transpose()?;
        Ok(cursor)
    }

    /// Move the cursor forward (within transaction); never moves it back
    ///
    /// Returns whether the stored cursor changed.
    pub fn advance_cursor_txn(
        &self,
        txn: &WriteTransaction,
        kind: EntityKind,
        cursor: &SyncCursor,
    ) -> StorageResult<bool> {
        let mut table = txn.open_table(SYNC_CURSORS_TABLE)?;
        let current: Option<SyncCursor> = table
            .get(kind.resource())?
            .map(|value| serde_json::from_slice(value.value()))
            .transpose()?;

        if current.as_ref().is_some_and(|current| current >= cursor) {
            return Ok(false);
        }

        let value = serde_json::to_vec(cursor)?;
        table.insert(kind.resource(), value.as_slice())?;
        Ok(true)
    }

    /// Forget the cursor of `kind`, the next pull is a full one
    pub fn clear_cursor(&self, kind: EntityKind) -> StorageResult<()> {
        let txn = self.begin_write()?;
        self.clear_cursor_txn(&txn, kind)?;
        txn.commit()?;
        Ok(())
    }

    fn clear_cursor_txn(&self, txn: &WriteTransaction, kind: EntityKind) -> StorageResult<()> {
        let mut table = txn.open_table(SYNC_CURSORS_TABLE)?;
        table.remove(kind.resource())?;
        Ok(())
    }

    // ========== Id Mappings ==========

    /// Record that `temp_id` became `server_id` (within transaction)
    pub fn put_id_mapping_txn(
        &self,
        txn: &WriteTransaction,
        temp_id: &str,
        server_id: &str,
    ) -> StorageResult<()> {
        let mut table = txn.open_table(ID_MAPPINGS_TABLE)?;
        table.insert(temp_id, server_id)?;
        Ok(())
    }

    pub fn list_id_mappings(&self) -> StorageResult<Vec<(String, String)>> {
        let read_txn = self.db.begin_read()?;
        let Some(table) = open_read(&read_txn, ID_MAPPINGS_TABLE)? else {
            return Ok(Vec::new());
        };
        let mut mappings = Vec::new();
        for result in table.iter()? {
            let (temp_id, server_id) = result?;
            mappings.push((temp_id.value().to_string(), server_id.value().to_string()));
        }
        Ok(mappings)
    }

    // ========== Mutation Queue ==========

    /// Increment and return the mutation sequence (within transaction)
    pub fn next_mutation_seq(&self, txn: &WriteTransaction) -> StorageResult<u64> {
        let mut table = txn.open_table(META_TABLE)?;
        let current = table
            .get(MUTATION_SEQ_KEY)?
            .map(|guard| guard.value())
            .unwrap_or(0);
        let next = current + 1;
        table.insert(MUTATION_SEQ_KEY, next)?;
        Ok(next)
    }

    /// Insert or replace a queue entry (within transaction)
    pub fn put_mutation_txn(
        &self,
        txn: &WriteTransaction,
        entry: &PendingMutation,
    ) -> StorageResult<()> {
        let mut table = txn.open_table(MUTATION_QUEUE_TABLE)?;
        let value = serde_json::to_vec(entry)?;
        table.insert(entry.seq, value.as_slice())?;
        Ok(())
    }

    /// Insert or replace a queue entry
    pub fn put_mutation(&self, entry: &PendingMutation) -> StorageResult<()> {
        let txn = self.begin_write()?;
        self.put_mutation_txn(&txn, entry)?;
        txn.commit()?;
        Ok(())
    }

    /// Remove a queue entry (within transaction)
    pub fn remove_mutation_txn(&self, txn: &WriteTransaction, seq: u64) -> StorageResult<bool> {
        let mut table = txn.open_table(MUTATION_QUEUE_TABLE)?;
        let existed = table.remove(seq)?.is_some();
        Ok(existed)
    }

    pub fn get_mutation(&self, seq: u64) -> StorageResult<Option<PendingMutation>> {
        let read_txn = self.db.begin_read()?;
        let Some(table) = open_read(&read_txn, MUTATION_QUEUE_TABLE)? else {
            return Ok(None);
        };
        let entry = table
            .get(seq)?
            .map(|value| serde_json::from_slice(value.value()))
            .transpose()?;
        Ok(entry)
    }

    /// All queue entries in enqueue order (within transaction)
    pub fn list_mutations_txn(&self, txn: &WriteTransaction) -> StorageResult<Vec<PendingMutation>> {
        let table = txn.open_table(MUTATION_QUEUE_TABLE)?;
        let mut entries = Vec::new();
        for result in table.iter()? {
            let (_key, value) = result?;
            entries.push(serde_json::from_slice(value.value())?);
        }
        Ok(entries)
    }

    /// All queue entries in enqueue order
    pub fn list_mutations(&self) -> StorageResult<Vec<PendingMutation>> {
        let read_txn = self.db.begin_read()?;
        let Some(table) = open_read(&read_txn, MUTATION_QUEUE_TABLE)? else {
            return Ok(Vec::new());
        };

        // redb iterates u64 keys in ascending order
        let mut entries = Vec::new();
        for result in table.iter()? {
            let (_key, value) = result?;
            let entry: PendingMutation = serde_json::from_slice(value.value())?;
            entries.push(entry);
        }
        Ok(entries)
    }

    /// (pending, failed) entry counts
    pub fn mutation_counts(&self) -> StorageResult<(usize, usize)> {
        let entries = self.list_mutations()?;
        let failed = entries
            .iter()
            .filter(|entry| entry.status == MutationStatus::Failed)
            .count();
        Ok((entries.len() - failed, failed))
    }

    // ========== Statistics ==========

    /// Get storage statistics
    pub fn get_stats(&self) -> StorageResult<StoreStats> {
        let mut rows = Vec::with_capacity(EntityKind::ALL.len());
        for kind in EntityKind::ALL {
            rows.push((kind, self.count(kind)?));
        }

        let read_txn = self.db.begin_read()?;
        let queued_mutations = match open_read(&read_txn, MUTATION_QUEUE_TABLE)? {
            Some(table) => table.len()?,
            None => 0,
        };

        Ok(StoreStats {
            rows,
            queued_mutations,
            schema_version: self.schema_version()?,
        })
    }
}

//! OfflineService, the one object callers hold
//!
//! Owns the local store, the id map, the puller and the mutation queue.
//! Construct it once per process and share the `Arc`.

use shared::models::{Category, DiningTable, OrderItem, Package, Product, Session, SessionOrder};
use shared::util::temp_id;
use shared::{Cached, EntityKind, EntityRef, SyncBadge, SyncEntity};
use std::sync::Arc;
use tokio::sync::{Notify, watch};

use crate::config::OfflineConfig;
use crate::connectivity::{Connectivity, ConnectivityMonitor};
use crate::error::{SyncError, SyncResult};
use crate::id_map::IdMap;
use crate::mutation::{Mutation, PendingMutation};
use crate::puller::{BatchPuller, PullOutcome, PullReport, SyncAllReport};
use crate::queue::{MutationQueue, ProcessReport, QueueStats};
use crate::remote::RemoteBackend;
use crate::storage::LocalStore;

pub struct OfflineService {
    config: OfflineConfig,
    store: LocalStore,
    id_map: Arc<IdMap>,
    connectivity: Arc<ConnectivityMonitor>,
    puller: BatchPuller,
    queue: MutationQueue,
}

impl OfflineService {
    /// Open the on-disk store under `config.work_dir`
    pub fn open(config: OfflineConfig, backend: Arc<dyn RemoteBackend>) -> SyncResult<Arc<Self>> {
        std::fs::create_dir_all(&config.work_dir).map_err(|e| {
            SyncError::Config(format!("cannot create work dir {}: {e}", config.work_dir))
        })?;
        let store = LocalStore::open(config.db_path())?;
        Self::new(store, backend, config)
    }

    /// Build on an already opened store
    ///
    /// Restores the temporary id map from the rows persisted by earlier runs.
    pub fn new(
        store: LocalStore,
        backend: Arc<dyn RemoteBackend>,
        config: OfflineConfig,
    ) -> SyncResult<Arc<Self>> {
        let id_map = Arc::new(IdMap::new());
        let restored = id_map.rebuild(&store)?;
        let connectivity = Arc::new(ConnectivityMonitor::new());

        let puller = BatchPuller::new(
            store.clone(),
            backend.clone(),
            connectivity.clone(),
            config.batch_size,
        );
        let queue = MutationQueue::new(
            store.clone(),
            backend,
            id_map.clone(),
            connectivity.clone(),
            config.retry,
        );

        let (pending, failed) = store.mutation_counts()?;
        tracing::info!(
            restored_ids = restored,
            pending,
            failed,
            batch_size = config.batch_size,
            "Offline service ready"
        );

        Ok(Arc::new(Self {
            config,
            store,
            id_map,
            connectivity,
            puller,
            queue,
        }))
    }

    pub fn config(&self) -> &OfflineConfig {
        &self.config
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn id_map(&self) -> &IdMap {
        &self.id_map
    }

    pub(crate) fn queue_notifier(&self) -> Arc<Notify> {
        self.queue.notifier()
    }

    pub fn connectivity(&self) -> Connectivity {
        self.connectivity.current()
    }

    pub fn subscribe_connectivity(&self) -> watch::Receiver<Connectivity> {
        self.connectivity.subscribe()
    }

    // ========== Pull ==========

    pub async fn sync(&self, kind: EntityKind) -> SyncResult<PullOutcome<PullReport>> {
        self.puller.sync(kind).await
    }

    pub async fn sync_all(&self) -> PullOutcome<SyncAllReport> {
        self.puller.sync_all().await
    }

    /// Manual full resync for a suspected corrupt cache
    pub async fn force_full_sync(&self) -> PullOutcome<SyncAllReport> {
        self.puller.force_full_sync().await
    }

    // ========== Writes ==========

    pub fn enqueue(&self, mutation: Mutation) -> SyncResult<u64> {
        self.queue.enqueue(mutation)
    }

    /// Open a tab; returns the temporary session id
    pub fn open_tab(&self, table_id: Option<String>, guest_count: i32) -> SyncResult<String> {
        let id = temp_id();
        self.queue.enqueue(Mutation::CreateSession {
            temp_id: id.clone(),
            table_id,
            guest_count,
        })?;
        Ok(id)
    }

    /// Add an order to a tab; returns the temporary order id
    pub fn add_order(&self, session_id: &str, items: Vec<OrderItem>) -> SyncResult<String> {
        let id = temp_id();
        self.queue.enqueue(Mutation::CreateOrder {
            temp_id: id.clone(),
            session: self.reference(session_id),
            items,
        })?;
        Ok(id)
    }

    pub fn confirm_order(&self, order_id: &str) -> SyncResult<u64> {
        self.queue.enqueue(Mutation::ConfirmOrder {
            order: self.reference(order_id),
        })
    }

    pub fn close_tab(&self, session_id: &str) -> SyncResult<u64> {
        self.queue.enqueue(Mutation::CloseSession {
            session: self.reference(session_id),
        })
    }

    /// A temporary id that is already resolved is sent as its server id
    fn reference(&self, id: &str) -> EntityRef {
        EntityRef::from_id(self.id_map.resolve(id))
    }

    pub async fn process_pending_mutations(&self) -> SyncResult<ProcessReport> {
        self.queue.process_pending_mutations().await
    }

    pub async fn retry_failed(&self, seq: u64) -> SyncResult<()> {
        self.queue.retry_failed(seq).await
    }

    pub async fn retry_all_failed(&self) -> SyncResult<usize> {
        self.queue.retry_all_failed().await
    }

    pub async fn acknowledge_failed(&self, seq: u64) -> SyncResult<PendingMutation> {
        self.queue.acknowledge_failed(seq).await
    }

    pub fn pending_mutations(&self) -> SyncResult<Vec<PendingMutation>> {
        self.queue.pending_mutations()
    }

    pub fn failed_mutations(&self) -> SyncResult<Vec<PendingMutation>> {
        self.queue.failed_mutations()
    }

    pub fn queue_stats(&self) -> SyncResult<QueueStats> {
        self.queue.queue_stats()
    }

    // ========== Reads (local mirror only) ==========

    /// Cached rows of `T`, without temporary rows already replaced by
    /// their real-id copy
    pub fn list<T: SyncEntity>(&self) -> SyncResult<Vec<Cached<T>>> {
        Ok(self
            .store
            .list::<T>()?
            .into_iter()
            .filter(|cached| cached.sync.resolved_mapping().is_none())
            .collect())
    }

    /// Cached row by id; a resolved temporary id yields the real row
    pub fn get<T: SyncEntity>(&self, id: &str) -> SyncResult<Option<Cached<T>>> {
        Ok(self.store.get::<T>(&self.id_map.resolve(id))?)
    }

    pub fn products(&self) -> SyncResult<Vec<Cached<Product>>> {
        self.list()
    }

    pub fn categories(&self) -> SyncResult<Vec<Cached<Category>>> {
        self.list()
    }

    pub fn packages(&self) -> SyncResult<Vec<Cached<Package>>> {
        self.list()
    }

    pub fn dining_tables(&self) -> SyncResult<Vec<Cached<DiningTable>>> {
        self.list()
    }

    pub fn sessions(&self) -> SyncResult<Vec<Cached<Session>>> {
        self.list()
    }

    pub fn session_orders(&self) -> SyncResult<Vec<Cached<SessionOrder>>> {
        self.list()
    }

    /// Orders of one tab, whichever id form the tab is known by
    pub fn orders_for_session(&self, session_id: &str) -> SyncResult<Vec<Cached<SessionOrder>>> {
        let session_id = self.id_map.resolve(session_id);
        Ok(self
            .session_orders()?
            .into_iter()
            .filter(|cached| self.id_map.resolve(&cached.entity.session_id) == session_id)
            .collect())
    }

    /// Badge for one cached row, `None` when the row is not cached
    pub fn badge(&self, kind: EntityKind, id: &str) -> SyncResult<Option<SyncBadge>> {
        let cached: Option<Cached<serde_json::Value>> =
            self.store.get_by_kind(kind, &self.id_map.resolve(id))?;
        Ok(cached.map(|cached| cached.sync.badge()))
    }

    /// Final drain before the process exits
    pub async fn shutdown(&self) {
        match self.queue.process_pending_mutations().await {
            Ok(report) => tracing::info!(
                synced = report.synced,
                remaining = report.deferred + report.waiting + report.retry_scheduled,
                "Final mutation drain finished"
            ),
            Err(e) => tracing::error!(error = %e, "Final mutation drain failed"),
        }
    }
}

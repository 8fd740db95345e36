//! Durable mutation queue
//!
//! Write intents are applied to the local store immediately and queued in
//! the same transaction. [`MutationQueue::process_pending_mutations`] replays
//! them against the backend in FIFO order:
//!
//! - a mutation whose temporary id is not resolved yet waits for its
//!   creator and is skipped, not failed
//! - later mutations touching a row with an earlier unfinished mutation
//!   are skipped too, so writes to one row reach the server in order
//! - transient failures back off exponentially until the retry budget is
//!   spent, then the entry is marked failed and stays in the queue
//! - "already closed" / "already confirmed" answers count as success
//! - business conflicts fail immediately and wait for the operator

use shared::models::{
    OrderStatus, Session, SessionCreate, SessionOrder, SessionOrderCreate,
    SessionStatus,
};
use shared::util::{is_temp_id, now_millis};
use shared::{Cached, EntityKind, SyncEntity, SyncState};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

use crate::config::RetryPolicy;
use crate::connectivity::ConnectivityMonitor;
use crate::error::{SyncError, SyncResult};
use crate::id_map::IdMap;
use crate::mutation::{FailureKind, Mutation, PendingMutation, WriteState};
use crate::mutation_log;
use crate::remote::{FailureClass, RemoteBackend, RemoteError};
use crate::storage::LocalStore;

/// Kinds created offline under temporary ids
const TEMP_KINDS: [EntityKind; 2] = [EntityKind::Session, EntityKind::SessionOrder];

/// Outcome of one drain pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessReport {
    /// Confirmed (or already applied) and removed from the queue
    pub synced: usize,
    /// Waiting on an unresolved id or an earlier mutation of the same row
    pub deferred: usize,
    /// Still in backoff from an earlier attempt
    pub waiting: usize,
    /// Transient failure, attempt rescheduled
    pub retry_scheduled: usize,
    /// Marked failed during this pass
    pub failed: usize,
    /// Pass stopped early after a transient failure
    pub interrupted: bool,
    /// Superseded temporary rows removed after the pass
    pub collected: usize,
}

/// Counts rendered as UI badges
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: usize,
    pub failed: usize,
    /// Cached rows still known only by a temporary id
    pub temporary_records: usize,
}

/// What happened to a single entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryOutcome {
    Synced,
    Deferred,
    RetryScheduled,
    Failed(FailureKind),
}

/// Server copy returned by a successful call
enum Confirmed {
    Session(Session),
    Order(SessionOrder),
}

pub struct MutationQueue {
    store: LocalStore,
    backend: Arc<dyn RemoteBackend>,
    id_map: Arc<IdMap>,
    connectivity: Arc<ConnectivityMonitor>,
    retry: RetryPolicy,
    /// Single writer towards the backend
    drain_lock: Mutex<()>,
    notify: Arc<Notify>,
}

impl MutationQueue {
    pub fn new(
        store: LocalStore,
        backend: Arc<dyn RemoteBackend>,
        id_map: Arc<IdMap>,
        connectivity: Arc<ConnectivityMonitor>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            backend,
            id_map,
            connectivity,
            retry,
            drain_lock: Mutex::new(()),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Woken whenever a mutation is queued or re-armed
    pub fn notifier(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    // ========== Enqueue ==========

    /// Queue a write intent and apply it to the local store
    ///
    /// Returns the queue sequence id.
    pub fn enqueue(&self, mutation: Mutation) -> SyncResult<u64> {
        validate(&mutation)?;

        let now = now_millis();
        let txn = self.store.begin_write()?;
        let seq = self.store.next_mutation_seq(&txn)?;
        self.apply_optimistic(&txn, &mutation, now)?;
        let entry = PendingMutation::new(seq, mutation, now);
        self.store.put_mutation_txn(&txn, &entry)?;
        txn.commit()?;

        mutation_log!(WriteState::OptimisticLocal, seq, entry.mutation.name());
        mutation_log!(entry.write_state(), seq, entry.mutation.name());
        tracing::debug!(seq, mutation = entry.mutation.name(), "Mutation queued");
        self.notify.notify_one();
        Ok(seq)
    }

    fn apply_optimistic(
        &self,
        txn: &redb::WriteTransaction,
        mutation: &Mutation,
        now: i64,
    ) -> SyncResult<()> {
        match mutation {
            Mutation::CreateSession {
                temp_id,
                table_id,
                guest_count,
            } => {
                let session = Session {
                    id: temp_id.clone(),
                    table_id: table_id.clone(),
                    guest_count: *guest_count,
                    status: SessionStatus::Open,
                    opened_at: now,
                    closed_at: None,
                };
                let cached = Cached::new(session, SyncState::optimistic(temp_id.as_str()));
                self.store.put_txn(txn, EntityKind::Session, temp_id, &cached)?;
            }
            Mutation::CreateOrder {
                temp_id,
                session,
                items,
            } => {
                let order = SessionOrder {
                    id: temp_id.clone(),
                    session_id: self.id_map.resolve(session.as_str()),
                    items: items.clone(),
                    status: OrderStatus::Pending,
                    created_at: now,
                    confirmed_at: None,
                };
                let cached = Cached::new(order, SyncState::optimistic(temp_id.as_str()));
                self.store
                    .put_txn(txn, EntityKind::SessionOrder, temp_id, &cached)?;

                for item in items {
                    self.store
                        .adjust_stock_txn(txn, &item.product_id, -i64::from(item.quantity))?;
                }
            }
            Mutation::ConfirmOrder { order } => {
                let id = self.id_map.resolve(order.as_str());
                let found = self.store.update_txn::<SessionOrder>(txn, &id, |cached| {
                    cached.entity.confirm(now);
                    cached.sync.pending = true;
                })?;
                if !found {
                    tracing::warn!(order = %id, "Confirming an order missing from the local cache");
                }
            }
            Mutation::CloseSession { session } => {
                let id = self.id_map.resolve(session.as_str());
                let found = self.store.update_txn::<Session>(txn, &id, |cached| {
                    cached.entity.close(now);
                    cached.sync.pending = true;
                })?;
                if !found {
                    tracing::warn!(session = %id, "Closing a session missing from the local cache");
                }
            }
        }
        Ok(())
    }

    // ========== Drain ==========

    /// Replay queued mutations against the backend
    ///
    /// Concurrent callers wait for the running pass to finish.
    pub async fn process_pending_mutations(&self) -> SyncResult<ProcessReport> {
        let _drain = self.drain_lock.lock().await;

        let entries = self.store.list_mutations()?;
        let creators: HashSet<String> = entries
            .iter()
            .filter_map(|entry| entry.mutation.creates().map(|(_, id)| id.to_string()))
            .collect();

        let mut report = ProcessReport::default();
        let mut blocked: HashSet<String> = HashSet::new();

        for entry in entries {
            let now = now_millis();
            if entry.is_failed() {
                self.block(&entry, &mut blocked)?;
                continue;
            }
            if !entry.is_due(now) {
                report.waiting += 1;
                self.block(&entry, &mut blocked)?;
                continue;
            }
            if self.touched_ids(&entry)?.iter().any(|id| blocked.contains(id)) {
                tracing::debug!(seq = entry.seq, "Earlier mutation on the same row unfinished, deferring");
                report.deferred += 1;
                self.block(&entry, &mut blocked)?;
                continue;
            }

            match self.process_entry(&entry, &creators).await? {
                EntryOutcome::Synced => report.synced += 1,
                EntryOutcome::Deferred => {
                    report.deferred += 1;
                    self.block(&entry, &mut blocked)?;
                }
                EntryOutcome::Failed(_) => {
                    report.failed += 1;
                    self.block(&entry, &mut blocked)?;
                }
                EntryOutcome::RetryScheduled => {
                    report.retry_scheduled += 1;
                    report.interrupted = true;
                    break;
                }
            }
        }

        report.collected = self.collect_superseded_temps()?;

        if report != ProcessReport::default() {
            tracing::info!(
                synced = report.synced,
                deferred = report.deferred,
                waiting = report.waiting,
                retry_scheduled = report.retry_scheduled,
                failed = report.failed,
                collected = report.collected,
                "Mutation queue pass finished"
            );
        }
        Ok(report)
    }

    /// Raw and resolved ids of every row an entry writes to
    fn touched_ids(&self, entry: &PendingMutation) -> SyncResult<Vec<String>> {
        let mut ids = Vec::new();
        let (_, target) = entry.mutation.target();
        ids.push(target.to_string());
        ids.push(self.id_map.resolve(target));

        if let Some(dependency) = entry.mutation.dependency() {
            ids.push(dependency.as_str().to_string());
            ids.push(self.id_map.resolve(dependency.as_str()));
        }

        // Confirming an order also orders it against its session's close
        if let Mutation::ConfirmOrder { order } = &entry.mutation {
            let id = self.id_map.resolve(order.as_str());
            if let Some(cached) = self.store.get::<SessionOrder>(&id)? {
                ids.push(self.id_map.resolve(&cached.entity.session_id));
                ids.push(cached.entity.session_id);
            }
        }
        Ok(ids)
    }

    fn block(&self, entry: &PendingMutation, blocked: &mut HashSet<String>) -> SyncResult<()> {
        blocked.extend(self.touched_ids(entry)?);
        Ok(())
    }

    async fn process_entry(
        &self,
        entry: &PendingMutation,
        creators: &HashSet<String>,
    ) -> SyncResult<EntryOutcome> {
        let resolved = match entry.mutation.dependency() {
            None => None,
            Some(dependency) => match self.id_map.resolve_ref(dependency) {
                Some(id) => Some(id),
                None if creators.contains(dependency.as_str()) => {
                    tracing::debug!(
                        seq = entry.seq,
                        temp_id = %dependency,
                        "Temporary id not resolved yet, deferring"
                    );
                    return Ok(EntryOutcome::Deferred);
                }
                None => {
                    let error = format!("temporary id {dependency} cannot be resolved");
                    self.mark_failed(entry.clone(), FailureKind::Unresolvable, &error, None)?;
                    return Ok(EntryOutcome::Failed(FailureKind::Unresolvable));
                }
            },
        };

        mutation_log!(WriteState::Sent, entry.seq, entry.mutation.name());
        match self.send(&entry.mutation, resolved.as_deref()).await {
            Ok(confirmed) => {
                self.connectivity.report_success();
                mutation_log!(WriteState::ServerConfirmed, entry.seq, entry.mutation.name());
                self.reconcile(entry, resolved.as_deref(), Some(confirmed))?;
                Ok(EntryOutcome::Synced)
            }
            Err(e) => {
                if e.is_connectivity() {
                    self.connectivity.report_unreachable(&e.to_string());
                } else {
                    self.connectivity.report_success();
                }
                self.handle_failure(entry, resolved.as_deref(), e)
            }
        }
    }

    async fn send(
        &self,
        mutation: &Mutation,
        resolved: Option<&str>,
    ) -> Result<Confirmed, RemoteError> {
        // Every mutation except CreateSession has a dependency, resolved above
        let target = || {
            resolved
                .map(str::to_string)
                .ok_or_else(|| RemoteError::InvalidResponse("unresolved dependency".into()))
        };

        match mutation {
            Mutation::CreateSession {
                temp_id,
                table_id,
                guest_count,
            } => {
                let req = SessionCreate {
                    table_id: table_id.clone(),
                    guest_count: *guest_count,
                    client_ref: temp_id.clone(),
                };
                self.backend.create_session(&req).await.map(Confirmed::Session)
            }
            Mutation::CreateOrder { temp_id, items, .. } => {
                let req = SessionOrderCreate {
                    session_id: target()?,
                    items: items.clone(),
                    client_ref: temp_id.clone(),
                };
                self.backend.create_order(&req).await.map(Confirmed::Order)
            }
            Mutation::ConfirmOrder { .. } => self
                .backend
                .confirm_order(&target()?)
                .await
                .map(Confirmed::Order),
            Mutation::CloseSession { .. } => self
                .backend
                .close_session(&target()?)
                .await
                .map(Confirmed::Session),
        }
    }

    fn handle_failure(
        &self,
        entry: &PendingMutation,
        resolved: Option<&str>,
        error: RemoteError,
    ) -> SyncResult<EntryOutcome> {
        let class = error.classify();
        tracing::debug!(seq = entry.seq, class = ?class, error = %error, "Mutation attempt failed");

        match class {
            FailureClass::AlreadyApplied if entry.mutation.creates().is_none() => {
                tracing::info!(
                    seq = entry.seq,
                    mutation = entry.mutation.name(),
                    "Server already holds this state, treating as success"
                );
                self.reconcile(entry, resolved, None)?;
                Ok(EntryOutcome::Synced)
            }
            // A create cannot be reconciled without the id the server assigned
            FailureClass::AlreadyApplied | FailureClass::Rejected => {
                mutation_log!(WriteState::ServerRejectedTerminal, entry.seq, entry.mutation.name());
                self.mark_failed(entry.clone(), FailureKind::Rejected, &error.to_string(), resolved)?;
                Ok(EntryOutcome::Failed(FailureKind::Rejected))
            }
            FailureClass::Conflict => {
                mutation_log!(WriteState::ServerRejectedTerminal, entry.seq, entry.mutation.name());
                self.mark_failed(entry.clone(), FailureKind::Conflict, &error.to_string(), resolved)?;
                Ok(EntryOutcome::Failed(FailureKind::Conflict))
            }
            FailureClass::Transient => self.schedule_retry(entry.clone(), &error, resolved),
        }
    }

    /// Back off a transient failure
    ///
    /// Only answers from the backend count against the retry budget. An
    /// unreachable backend is reported through connectivity instead, so a
    /// write made offline waits for as long as the outage lasts.
    fn schedule_retry(
        &self,
        mut entry: PendingMutation,
        error: &RemoteError,
        resolved: Option<&str>,
    ) -> SyncResult<EntryOutcome> {
        let now = now_millis();
        let counted = !error.is_connectivity();
        if counted {
            entry.retry_count += 1;
            if self.retry.is_exhausted(entry.retry_count) {
                let message = format!("retries exhausted: {error}");
                self.mark_failed(entry, FailureKind::RetriesExhausted, &message, resolved)?;
                return Ok(EntryOutcome::Failed(FailureKind::RetriesExhausted));
            }
        }

        let delay = self.retry.delay_for(entry.retry_count.max(1));
        entry.last_error = Some(error.to_string());
        entry.updated_at = now;
        entry.next_attempt_at = now + delay.as_millis() as i64;
        self.store.put_mutation(&entry)?;

        let details = if counted {
            format!("attempt {} in {}ms", entry.retry_count, delay.as_millis())
        } else {
            format!("backend unreachable, next attempt in {}ms", delay.as_millis())
        };
        mutation_log!(WriteState::ServerRejectedRetryable, entry.seq, entry.mutation.name(), details);
        Ok(EntryOutcome::RetryScheduled)
    }

    /// Terminal failure: keep the entry and flag the affected row
    fn mark_failed(
        &self,
        mut entry: PendingMutation,
        kind: FailureKind,
        error: &str,
        resolved: Option<&str>,
    ) -> SyncResult<()> {
        entry.fail(kind, error, now_millis());

        let txn = self.store.begin_write()?;
        self.store.put_mutation_txn(&txn, &entry)?;
        let (target_kind, target) = entry.mutation.target();
        for id in [Some(target), resolved].into_iter().flatten() {
            self.store.update_sync_txn(&txn, target_kind, id, |sync| {
                sync.error = Some(error.to_string());
            })?;
        }
        txn.commit()?;

        tracing::warn!(
            seq = entry.seq,
            mutation = entry.mutation.name(),
            failure = ?kind,
            error = %error,
            "Mutation failed, operator action required"
        );
        mutation_log!(entry.write_state(), entry.seq, entry.mutation.name(), error);
        Ok(())
    }

    /// Whether any queued entry other than `seq` writes to row `id`
    ///
    /// Entries that only depend on the row (an order on a session) do not
    /// change it and are ignored.
    fn targeted_elsewhere(&self, queued: &[PendingMutation], seq: u64, id: &str) -> bool {
        queued.iter().filter(|other| other.seq != seq).any(|other| {
            let (_, target) = other.mutation.target();
            target == id || self.id_map.resolve(target) == id
        })
    }

    /// Apply the server's answer locally and drop the entry, in one transaction
    fn reconcile(
        &self,
        entry: &PendingMutation,
        resolved: Option<&str>,
        confirmed: Option<Confirmed>,
    ) -> SyncResult<()> {
        let now = now_millis();
        let txn = self.store.begin_write()?;
        let queued = self.store.list_mutations_txn(&txn)?;
        let mut new_mapping: Option<(String, String)> = None;

        match (&entry.mutation, confirmed) {
            (Mutation::CreateSession { temp_id, .. }, Some(Confirmed::Session(server))) => {
                let server_id = server.id.clone();
                let still_pending = self.targeted_elsewhere(&queued, entry.seq, temp_id);
                let real = self.promote::<Session>(&txn, temp_id, server, still_pending)?;
                self.store.put_txn(&txn, EntityKind::Session, &server_id, &real)?;
                let moved = self.store.rewrite_order_session_txn(&txn, temp_id, &server_id)?;
                tracing::debug!(temp_id = %temp_id, server_id = %server_id, orders = moved, "Session id reconciled");
                new_mapping = Some((temp_id.clone(), server_id));
            }
            (Mutation::CreateOrder { temp_id, .. }, Some(Confirmed::Order(server))) => {
                let server_id = server.id.clone();
                let still_pending = self.targeted_elsewhere(&queued, entry.seq, temp_id);
                let mut real = self.promote::<SessionOrder>(&txn, temp_id, server, still_pending)?;
                real.entity.session_id = self.id_map.resolve(&real.entity.session_id);
                self.store
                    .put_txn(&txn, EntityKind::SessionOrder, &server_id, &real)?;
                new_mapping = Some((temp_id.clone(), server_id));
            }
            (Mutation::ConfirmOrder { order }, confirmed) => {
                let id = resolved.unwrap_or(order.as_str());
                let still_pending = self.targeted_elsewhere(&queued, entry.seq, id);
                let server = match confirmed {
                    Some(Confirmed::Order(server)) => Some(server),
                    _ => None,
                };
                self.settle::<SessionOrder>(&txn, id, server, still_pending, |order| {
                    order.confirm(now)
                })?;
            }
            (Mutation::CloseSession { session }, confirmed) => {
                let id = resolved.unwrap_or(session.as_str());
                let still_pending = self.targeted_elsewhere(&queued, entry.seq, id);
                let server = match confirmed {
                    Some(Confirmed::Session(server)) => Some(server),
                    _ => None,
                };
                self.settle::<Session>(&txn, id, server, still_pending, |session| {
                    session.close(now)
                })?;
            }
            (mutation, _) => {
                return Err(SyncError::InvalidMutation(format!(
                    "{} answered with an unexpected payload",
                    mutation.name()
                )));
            }
        }

        if let Some((temp_id, server_id)) = &new_mapping {
            self.store.put_id_mapping_txn(&txn, temp_id, server_id)?;
        }
        self.store.remove_mutation_txn(&txn, entry.seq)?;
        txn.commit()?;

        if let Some((temp_id, server_id)) = new_mapping {
            self.id_map.insert(temp_id, server_id);
        }
        mutation_log!(WriteState::Reconciled, entry.seq, entry.mutation.name());
        Ok(())
    }

    /// Mark the temporary row as resolved and build the real-id row
    ///
    /// While later mutations still target the temporary id the local copy
    /// wins, since it already carries their optimistic effects.
    fn promote<T: SyncEntity>(
        &self,
        txn: &redb::WriteTransaction,
        temp_id: &str,
        server: T,
        still_pending: bool,
    ) -> SyncResult<Cached<T>> {
        let server_id = server.id().to_string();
        let mut local: Option<T> = None;
        self.store.update_txn::<T>(txn, temp_id, |cached| {
            cached.sync.server_id = Some(server_id.clone());
            cached.sync.pending = false;
            cached.sync.error = None;
            local = Some(cached.entity.clone());
        })?;

        let entity = match local {
            Some(mut local) if still_pending => {
                local.set_id(server_id);
                local
            }
            _ => server,
        };
        let mut sync = SyncState::synced(0);
        sync.pending = still_pending;
        Ok(Cached::new(entity, sync))
    }

    /// Settle a state change on an existing row
    fn settle<T: SyncEntity>(
        &self,
        txn: &redb::WriteTransaction,
        id: &str,
        server: Option<T>,
        still_pending: bool,
        apply: impl FnOnce(&mut T),
    ) -> SyncResult<()> {
        let found = self.store.update_txn::<T>(txn, id, |cached| {
            match server.clone() {
                Some(server) if !still_pending => cached.entity = server,
                _ => apply(&mut cached.entity),
            }
            cached.sync.pending = still_pending;
            cached.sync.error = None;
        })?;

        if !found && let Some(server) = server {
            self.store
                .put_txn(txn, T::KIND, id, &Cached::new(server, SyncState::synced(0)))?;
        }
        Ok(())
    }

    /// Delete temporary rows whose real row exists and that no queued
    /// mutation refers to anymore
    fn collect_superseded_temps(&self) -> SyncResult<usize> {
        let txn = self.store.begin_write()?;
        let queued = self.store.list_mutations_txn(&txn)?;
        let mut collected = Vec::new();

        for kind in TEMP_KINDS {
            for (key, cached) in self.store.list_raw_txn(&txn, kind)? {
                let Some((temp_id, _)) = cached.sync.resolved_mapping() else {
                    continue;
                };
                if queued.iter().any(|entry| entry.mutation.references_temp(temp_id)) {
                    continue;
                }
                self.store.remove_txn(&txn, kind, &key)?;
                collected.push(temp_id.to_string());
            }
        }
        txn.commit()?;

        // Mappings stay: callers may still hold the temporary ids
        if !collected.is_empty() {
            tracing::debug!(count = collected.len(), "Removed superseded temporary rows");
        }
        Ok(collected.len())
    }

    // ========== Operator actions ==========

    /// Put a failed mutation back in the queue with a fresh retry budget
    pub async fn retry_failed(&self, seq: u64) -> SyncResult<()> {
        let _drain = self.drain_lock.lock().await;
        let mut entry = self
            .store
            .get_mutation(seq)?
            .ok_or(SyncError::MutationNotFound(seq))?;
        if !entry.is_failed() {
            return Err(SyncError::NotFailed(seq));
        }

        entry.reset_for_retry(now_millis());
        let txn = self.store.begin_write()?;
        self.store.put_mutation_txn(&txn, &entry)?;
        self.clear_row_error(&txn, &entry.mutation)?;
        txn.commit()?;

        mutation_log!(entry.write_state(), seq, entry.mutation.name(), "operator retry");
        self.notify.notify_one();
        Ok(())
    }

    /// Re-arm every failed mutation, returns how many
    pub async fn retry_all_failed(&self) -> SyncResult<usize> {
        let failed: Vec<u64> = self
            .store
            .list_mutations()?
            .into_iter()
            .filter(PendingMutation::is_failed)
            .map(|entry| entry.seq)
            .collect();

        for seq in &failed {
            self.retry_failed(*seq).await?;
        }
        Ok(failed.len())
    }

    /// Accept a terminal failure: drop the entry and roll back its local effect
    pub async fn acknowledge_failed(&self, seq: u64) -> SyncResult<PendingMutation> {
        let _drain = self.drain_lock.lock().await;
        let entry = self
            .store
            .get_mutation(seq)?
            .ok_or(SyncError::MutationNotFound(seq))?;
        if !entry.is_failed() {
            return Err(SyncError::NotFailed(seq));
        }

        let txn = self.store.begin_write()?;
        self.store.remove_mutation_txn(&txn, seq)?;
        let queued = self.store.list_mutations_txn(&txn)?;

        match &entry.mutation {
            Mutation::CreateSession { temp_id, .. } => {
                self.store.remove_txn(&txn, EntityKind::Session, temp_id)?;
            }
            Mutation::CreateOrder { temp_id, items, .. } => {
                self.store.remove_txn(&txn, EntityKind::SessionOrder, temp_id)?;
                for item in items {
                    self.store
                        .adjust_stock_txn(&txn, &item.product_id, i64::from(item.quantity))?;
                }
            }
            Mutation::ConfirmOrder { order } => {
                for id in self.row_ids(order.as_str()) {
                    let pending = self.targeted_elsewhere(&queued, seq, &id);
                    self.store.update_txn::<SessionOrder>(&txn, &id, |cached| {
                        cached.entity.status = OrderStatus::Pending;
                        cached.entity.confirmed_at = None;
                        cached.sync.pending = pending;
                        cached.sync.error = None;
                    })?;
                }
            }
            Mutation::CloseSession { session } => {
                for id in self.row_ids(session.as_str()) {
                    let pending = self.targeted_elsewhere(&queued, seq, &id);
                    self.store.update_txn::<Session>(&txn, &id, |cached| {
                        cached.entity.status = SessionStatus::Open;
                        cached.entity.closed_at = None;
                        cached.sync.pending = pending;
                        cached.sync.error = None;
                    })?;
                }
            }
        }
        txn.commit()?;

        tracing::info!(
            seq,
            mutation = entry.mutation.name(),
            failure = ?entry.failure,
            "Failed mutation acknowledged, local change rolled back"
        );
        mutation_log!(
            entry.write_state(),
            seq,
            entry.mutation.name(),
            format!("acknowledged: {}", entry.last_error.as_deref().unwrap_or_default())
        );
        Ok(entry)
    }

    /// Raw id plus its resolved form when different
    fn row_ids(&self, id: &str) -> Vec<String> {
        let resolved = self.id_map.resolve(id);
        if resolved == id {
            vec![resolved]
        } else {
            vec![id.to_string(), resolved]
        }
    }

    fn clear_row_error(&self, txn: &redb::WriteTransaction, mutation: &Mutation) -> SyncResult<()> {
        let (kind, target) = mutation.target();
        for id in self.row_ids(target) {
            self.store.update_sync_txn(txn, kind, &id, |sync| sync.error = None)?;
        }
        Ok(())
    }

    // ========== Queries ==========

    /// Every queued entry, failed ones included, in queue order
    pub fn pending_mutations(&self) -> SyncResult<Vec<PendingMutation>> {
        Ok(self.store.list_mutations()?)
    }

    pub fn failed_mutations(&self) -> SyncResult<Vec<PendingMutation>> {
        Ok(self
            .store
            .list_mutations()?
            .into_iter()
            .filter(PendingMutation::is_failed)
            .collect())
    }

    pub fn queue_stats(&self) -> SyncResult<QueueStats> {
        let (pending, failed) = self.store.mutation_counts()?;
        let mut temporary_records = 0;
        for kind in TEMP_KINDS {
            temporary_records += self
                .store
                .list_raw(kind)?
                .iter()
                .filter(|cached| cached.sync.is_temporary() && cached.sync.server_id.is_none())
                .count();
        }
        Ok(QueueStats {
            pending,
            failed,
            temporary_records,
        })
    }
}

fn validate(mutation: &Mutation) -> SyncResult<()> {
    if let Some((_, temp_id)) = mutation.creates()
        && !is_temp_id(temp_id)
    {
        return Err(SyncError::InvalidMutation(format!(
            "{} must use a temporary id, got {temp_id}",
            mutation.name()
        )));
    }
    match mutation {
        Mutation::CreateSession { guest_count, .. } if *guest_count < 0 => Err(
            SyncError::InvalidMutation("guest count cannot be negative".into()),
        ),
        Mutation::CreateOrder { items, .. } if items.is_empty() => {
            Err(SyncError::InvalidMutation("order has no items".into()))
        }
        Mutation::CreateOrder { items, .. } if items.iter().any(|item| item.quantity <= 0) => Err(
            SyncError::InvalidMutation("item quantity must be positive".into()),
        ),
        _ => Ok(()),
    }
}

//! Batch puller
//!
//! Mirrors server tables into the [`LocalStore`]. A kind without a cursor is
//! pulled from scratch; a kind with a cursor only fetches rows after it.
//! Every page is written together with the cursor that points at its last
//! row, so an interrupted pull resumes after the last written page. Pages
//! are requested until the backend returns an empty one, so a backend that
//! serves fewer rows than asked for still gets pulled completely.

use futures::future::join_all;
use parking_lot::Mutex;
use shared::{EntityKind, RemoteRow, SyncCursor};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::connectivity::ConnectivityMonitor;
use crate::error::SyncResult;
use crate::remote::{RemoteBackend, RemoteError};
use crate::storage::LocalStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullMode {
    /// No cursor, or forced: table replaced (local-only rows kept) by a pull
    /// from the start
    Full,
    /// Rows after the stored cursor only
    Incremental,
}

/// Result of pulling one entity kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullReport {
    pub kind: EntityKind,
    pub mode: PullMode,
    /// Non-empty pages fetched
    pub pages: usize,
    pub rows_written: usize,
    pub rows_deleted: usize,
    /// Cursor after the pull
    pub cursor: Option<SyncCursor>,
}

/// Result of pulling every entity kind
#[derive(Debug, Default)]
pub struct SyncAllReport {
    pub completed: Vec<PullReport>,
    /// Kinds whose pull failed; their previous cache is untouched
    pub failed: Vec<(EntityKind, String)>,
    /// Kinds already being pulled by another caller
    pub skipped: Vec<EntityKind>,
}

impl SyncAllReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }
}

#[derive(Debug)]
pub enum PullOutcome<T> {
    Completed(T),
    /// An overlapping pull of the same scope is in progress
    AlreadyRunning,
}

impl<T> PullOutcome<T> {
    pub fn completed(self) -> Option<T> {
        match self {
            PullOutcome::Completed(report) => Some(report),
            PullOutcome::AlreadyRunning => None,
        }
    }
}

/// Clears the flag when the pass ends, including on early return
struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct KindGuard<'a> {
    in_flight: &'a Mutex<HashSet<EntityKind>>,
    kind: EntityKind,
}

impl Drop for KindGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.kind);
    }
}

pub struct BatchPuller {
    store: LocalStore,
    backend: Arc<dyn RemoteBackend>,
    connectivity: Arc<ConnectivityMonitor>,
    batch_size: usize,
    /// A sync_all / force_full_sync pass is running
    pass_running: AtomicBool,
    in_flight: Mutex<HashSet<EntityKind>>,
}

impl BatchPuller {
    pub fn new(
        store: LocalStore,
        backend: Arc<dyn RemoteBackend>,
        connectivity: Arc<ConnectivityMonitor>,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            backend,
            connectivity,
            batch_size: batch_size.max(1),
            pass_running: AtomicBool::new(false),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn is_pass_running(&self) -> bool {
        self.pass_running.load(Ordering::Acquire)
    }

    fn claim_pass(&self) -> Option<PassGuard<'_>> {
        self.pass_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| PassGuard(&self.pass_running))
    }

    fn claim_kind(&self, kind: EntityKind) -> Option<KindGuard<'_>> {
        if !self.in_flight.lock().insert(kind) {
            return None;
        }
        Some(KindGuard {
            in_flight: &self.in_flight,
            kind,
        })
    }

    /// Pull one entity kind
    pub async fn sync(&self, kind: EntityKind) -> SyncResult<PullOutcome<PullReport>> {
        self.pull(kind, false).await
    }

    /// `force_full` ignores the stored cursor. The cache of `kind` is only
    /// replaced once the first page has been fetched.
    async fn pull(&self, kind: EntityKind, force_full: bool) -> SyncResult<PullOutcome<PullReport>> {
        let Some(_guard) = self.claim_kind(kind) else {
            tracing::debug!(kind = %kind, "Pull already in progress, skipping");
            return Ok(PullOutcome::AlreadyRunning);
        };

        let started = Instant::now();
        let mut cursor = if force_full {
            None
        } else {
            self.store.get_cursor(kind)?
        };
        let mode = if cursor.is_some() {
            PullMode::Incremental
        } else {
            PullMode::Full
        };
        let mut replace = mode == PullMode::Full;
        if replace {
            tracing::info!(kind = %kind, "Starting full pull");
        }

        let mut report = PullReport {
            kind,
            mode,
            pages: 0,
            rows_written: 0,
            rows_deleted: 0,
            cursor: cursor.clone(),
        };

        loop {
            let rows = self.fetch_page(kind, cursor.as_ref()).await?;

            // Rows at or before the cursor were already written
            let rows: Vec<RemoteRow> = rows
                .into_iter()
                .filter(|row| cursor.as_ref().is_none_or(|c| c.is_before(row)))
                .collect();

            let next = rows
                .iter()
                .max_by(|a, b| (a.last_modified, &a.id).cmp(&(b.last_modified, &b.id)))
                .map(SyncCursor::at);

            let stats = if replace {
                replace = false;
                self.store.replace_with_page(kind, &rows, next.as_ref())?
            } else if let Some(next) = &next {
                self.store.apply_pull_page(kind, &rows, next)?
            } else {
                break;
            };
            report.rows_written += stats.written;
            report.rows_deleted += stats.deleted;

            // An empty page ends the pull
            let Some(next) = next else {
                break;
            };
            report.pages += 1;

            tracing::debug!(
                kind = %kind,
                page = report.pages,
                rows = rows.len(),
                cursor_ts = next.last_modified,
                cursor_id = %next.last_id,
                "Pulled page"
            );

            cursor = Some(next);
        }

        report.cursor = cursor;
        tracing::info!(
            kind = %kind,
            mode = ?mode,
            pages = report.pages,
            written = report.rows_written,
            deleted = report.rows_deleted,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Pull finished"
        );
        Ok(PullOutcome::Completed(report))
    }

    async fn fetch_page(
        &self,
        kind: EntityKind,
        after: Option<&SyncCursor>,
    ) -> Result<Vec<RemoteRow>, RemoteError> {
        match self.backend.fetch_rows(kind, after, self.batch_size).await {
            Ok(rows) => {
                self.connectivity.report_success();
                Ok(rows)
            }
            Err(e) => {
                if e.is_connectivity() {
                    self.connectivity.report_unreachable(&e.to_string());
                }
                Err(e)
            }
        }
    }

    /// Pull every entity kind concurrently
    ///
    /// One kind failing does not stop the others.
    pub async fn sync_all(&self) -> PullOutcome<SyncAllReport> {
        let Some(_guard) = self.claim_pass() else {
            tracing::debug!("Sync pass already running");
            return PullOutcome::AlreadyRunning;
        };
        PullOutcome::Completed(self.run_all(false).await)
    }

    /// Pull everything from scratch, ignoring stored cursors
    ///
    /// Rows with local changes not yet confirmed by the server are kept. A
    /// kind whose first page cannot be fetched keeps its cache and cursor.
    pub async fn force_full_sync(&self) -> PullOutcome<SyncAllReport> {
        let Some(_guard) = self.claim_pass() else {
            tracing::debug!("Sync pass already running, full resync skipped");
            return PullOutcome::AlreadyRunning;
        };
        tracing::info!("Forcing full resync of every entity kind");
        PullOutcome::Completed(self.run_all(true).await)
    }

    async fn run_all(&self, force_full: bool) -> SyncAllReport {
        let results = join_all(EntityKind::ALL.into_iter().map(|kind| async move {
            (kind, self.pull(kind, force_full).await)
        }))
        .await;

        let mut report = SyncAllReport::default();
        for (kind, result) in results {
            match result {
                Ok(PullOutcome::Completed(pull)) => report.completed.push(pull),
                Ok(PullOutcome::AlreadyRunning) => report.skipped.push(kind),
                Err(e) => {
                    tracing::warn!(kind = %kind, error = %e, "Pull failed, keeping cached rows");
                    report.failed.push((kind, e.to_string()));
                }
            }
        }
        report
    }
}

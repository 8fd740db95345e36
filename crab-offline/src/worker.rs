//! OfflineWorker: background task that keeps the mirror and the queue moving
//!
//! - pulls every kind on startup
//! - drains the mutation queue when a mutation is queued, on a periodic scan
//!   and when connectivity comes back
//! - forces a full resync on a long interval (daily by default) while the
//!   backend is reachable
//! - pulls single kinds when the optional change feed says they changed

use shared::EntityKind;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::connectivity::Connectivity;
use crate::puller::PullOutcome;
use crate::service::OfflineService;

pub struct OfflineWorker {
    service: Arc<OfflineService>,
    shutdown: CancellationToken,
    change_feed: Option<mpsc::Receiver<EntityKind>>,
}

impl OfflineWorker {
    pub fn new(service: Arc<OfflineService>, shutdown: CancellationToken) -> Self {
        Self {
            service,
            shutdown,
            change_feed: None,
        }
    }

    /// Realtime invalidation feed; each message pulls that kind
    pub fn with_change_feed(mut self, feed: mpsc::Receiver<EntityKind>) -> Self {
        self.change_feed = Some(feed);
        self
    }

    pub async fn run(mut self) {
        tracing::info!("OfflineWorker started");

        let config = self.service.config().clone();
        let notify = self.service.queue_notifier();
        let mut connectivity = self.service.subscribe_connectivity();

        let mut scan_interval =
            tokio::time::interval(Duration::from_secs(config.pending_scan_interval_secs.max(1)));
        scan_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let full_sync_period = Duration::from_secs(config.full_sync_interval_secs.max(60));
        let mut full_sync_interval =
            tokio::time::interval_at(Instant::now() + full_sync_period, full_sync_period);
        full_sync_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        self.pull_all().await;
        self.drain().await;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!("OfflineWorker shutting down");
                    break;
                }

                _ = notify.notified() => self.drain().await,

                _ = scan_interval.tick() => self.drain().await,

                _ = full_sync_interval.tick() => self.scheduled_full_sync().await,

                Ok(()) = connectivity.changed() => {
                    let state = *connectivity.borrow_and_update();
                    if state == Connectivity::Online {
                        tracing::info!("Reconnected, replaying queued mutations");
                        self.drain().await;
                        self.pull_all().await;
                    }
                }

                change = next_change(&mut self.change_feed), if self.change_feed.is_some() => {
                    match change {
                        Some(kind) => {
                            if let Err(e) = self.service.sync(kind).await {
                                tracing::warn!(kind = %kind, error = %e, "Change feed pull failed");
                            }
                        }
                        None => {
                            tracing::info!("Change feed closed");
                            self.change_feed = None;
                        }
                    }
                }
            }
        }

        self.service.shutdown().await;
        tracing::info!("OfflineWorker stopped");
    }

    async fn drain(&self) {
        if let Err(e) = self.service.process_pending_mutations().await {
            tracing::error!(error = %e, "Mutation queue pass failed");
        }
    }

    async fn scheduled_full_sync(&self) {
        if self.service.connectivity() == Connectivity::Offline {
            tracing::info!("Backend unreachable, scheduled full resync skipped");
            return;
        }
        if let PullOutcome::Completed(report) = self.service.force_full_sync().await
            && !report.failed.is_empty()
        {
            tracing::warn!(failed = report.failed.len(), "Scheduled full resync incomplete");
        }
    }

    async fn pull_all(&self) {
        if let PullOutcome::Completed(report) = self.service.sync_all().await
            && !report.failed.is_empty()
        {
            tracing::warn!(
                failed = ?report.failed.iter().map(|(kind, _)| *kind).collect::<Vec<_>>(),
                "Some entity kinds could not be pulled"
            );
        }
    }
}

async fn next_change(feed: &mut Option<mpsc::Receiver<EntityKind>>) -> Option<EntityKind> {
    match feed {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

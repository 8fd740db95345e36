//! Online/offline state derived from backend call outcomes

use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Online,
    Offline,
}

/// Tracks connectivity and announces transitions once
///
/// Callers report every backend outcome; only a change of state is logged
/// and published, so a burst of failures while offline produces one notice.
#[derive(Debug)]
pub struct ConnectivityMonitor {
    tx: watch::Sender<Connectivity>,
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectivityMonitor {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Connectivity::Online);
        Self { tx }
    }

    pub fn current(&self) -> Connectivity {
        *self.tx.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.current() == Connectivity::Online
    }

    /// Subscribe to transitions (UI "offline" banner)
    pub fn subscribe(&self) -> watch::Receiver<Connectivity> {
        self.tx.subscribe()
    }

    /// A backend call went through
    pub fn report_success(&self) {
        if self.set(Connectivity::Online) {
            tracing::info!("Backend reachable again, back online");
        }
    }

    /// A backend call failed before reaching the server
    pub fn report_unreachable(&self, error: &str) {
        if self.set(Connectivity::Offline) {
            tracing::warn!(error = %error, "Backend unreachable, working offline");
        }
    }

    /// Returns whether the state changed
    fn set(&self, state: Connectivity) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        })
    }
}

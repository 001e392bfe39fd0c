use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{SyncError, SyncOrchestrator, SyncOutcome};
use crate::network::{ConnectivityState, ConnectivityStatus};

/// Default period between background staleness checks (1 hour)
pub const DEFAULT_AUTO_SYNC_INTERVAL_SECS: u64 = 3600;

/// Background task that keeps the cache fresh without user action.
///
/// Syncs when connectivity comes back (`Offline -> Online` only) and on a
/// fixed interval. Both paths go through `request_sync(false)`, so they are
/// no-ops while the cache is fresh or the device is offline.
pub struct AutoSync {
    handle: JoinHandle<()>,
}

impl AutoSync {
    /// Must be called within a Tokio runtime. The first interval check
    /// fires after `check_interval`, not immediately.
    pub fn spawn(
        orchestrator: Arc<SyncOrchestrator>,
        mut network: watch::Receiver<ConnectivityState>,
        check_interval: Duration,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let mut last_status = network.borrow_and_update().status;
            let mut ticker = tokio::time::interval_at(Instant::now() + check_interval, check_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    changed = network.changed() => {
                        if changed.is_err() {
                            debug!("Network monitor gone, stopping auto-sync");
                            break;
                        }
                        let status = network.borrow_and_update().status;
                        let reconnected = last_status == ConnectivityStatus::Offline
                            && status == ConnectivityStatus::Online;
                        last_status = status;
                        if reconnected {
                            info!("Back online, syncing");
                            log_result(orchestrator.request_sync(false).await);
                        }
                    }
                    _ = ticker.tick() => {
                        debug!("Periodic sync check");
                        log_result(orchestrator.request_sync(false).await);
                    }
                }
            }
        });

        Self { handle }
    }

    pub fn stop(&self) {
        self.handle.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for AutoSync {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn log_result(result: Result<SyncOutcome, SyncError>) {
    match result {
        Ok(SyncOutcome::Fresh { .. }) => debug!("Cache still fresh"),
        Ok(outcome) => info!(?outcome, "Background sync finished"),
        Err(SyncError::AlreadyInProgress) | Err(SyncError::Offline) => {}
        Err(e) => warn!(error = %e, "Background sync failed"),
    }
}

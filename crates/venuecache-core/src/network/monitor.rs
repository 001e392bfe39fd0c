use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::ConnectivityProbe;

/// Default poll interval in seconds.
/// 30s debounces rapid online/offline flapping on mobile links.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum ConnectivityStatus {
    Online,
    Offline,
}

impl ConnectivityStatus {
    pub fn from_reachable(reachable: bool) -> Self {
        if reachable {
            ConnectivityStatus::Online
        } else {
            ConnectivityStatus::Offline
        }
    }
}

/// Last known connectivity and when it last changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct ConnectivityState {
    pub status: ConnectivityStatus,
    pub changed_at: DateTime<Utc>,
}

impl ConnectivityState {
    pub fn new(status: ConnectivityStatus) -> Self {
        Self {
            status,
            changed_at: Utc::now(),
        }
    }

    pub fn is_online(&self) -> bool {
        self.status == ConnectivityStatus::Online
    }
}

/// Owns the process's connectivity state.
///
/// Only the monitor writes the state. Readers either ask for the current
/// value or hold a `watch` receiver to be woken on transitions.
pub struct NetworkMonitor {
    probe: Arc<dyn ConnectivityProbe>,
    state: Arc<watch::Sender<ConnectivityState>>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl NetworkMonitor {
    pub fn new(probe: Arc<dyn ConnectivityProbe>, initial: ConnectivityStatus) -> Self {
        let (tx, _rx) = watch::channel(ConnectivityState::new(initial));
        Self {
            probe,
            state: Arc::new(tx),
            poller: Mutex::new(None),
        }
    }

    /// Last known state; never blocks on the network.
    pub fn current_state(&self) -> ConnectivityState {
        *self.state.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.current_state().is_online()
    }

    /// Receiver that is notified on every status change.
    pub fn watch(&self) -> watch::Receiver<ConnectivityState> {
        self.state.subscribe()
    }

    /// Push a status from outside (e.g. an OS callback). Last write wins.
    /// Returns whether the status changed.
    pub fn set_status(&self, status: ConnectivityStatus) -> bool {
        Self::apply(&self.state, status)
    }

    /// Run the probe once and apply the result.
    pub async fn refresh(&self) -> ConnectivityState {
        let reachable = self.probe.check().await;
        self.set_status(ConnectivityStatus::from_reachable(reachable));
        self.current_state()
    }

    /// Start polling the probe every `poll_interval`, replacing any running poller.
    ///
    /// The first probe runs immediately. Must be called within a Tokio runtime.
    pub fn start(&self, poll_interval: Duration) {
        let probe = Arc::clone(&self.probe);
        let state = Arc::clone(&self.state);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let reachable = probe.check().await;
                Self::apply(&state, ConnectivityStatus::from_reachable(reachable));
            }
        });

        if let Some(previous) = self.poller().replace(handle) {
            previous.abort();
        }
        debug!(interval_ms = poll_interval.as_millis() as u64, "Network polling started");
    }

    /// Stop polling. Safe to call when not running.
    pub fn stop(&self) {
        if let Some(handle) = self.poller().take() {
            handle.abort();
            debug!("Network polling stopped");
        }
    }

    pub fn is_polling(&self) -> bool {
        self.poller()
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    fn poller(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.poller.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply(state: &watch::Sender<ConnectivityState>, status: ConnectivityStatus) -> bool {
        let changed = state.send_if_modified(|current| {
            if current.status == status {
                false
            } else {
                *current = ConnectivityState::new(status);
                true
            }
        });

        if changed {
            match status {
                ConnectivityStatus::Online => info!("Network: online"),
                ConnectivityStatus::Offline => warn!("Network: offline"),
            }
        }
        changed
    }
}

impl Drop for NetworkMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

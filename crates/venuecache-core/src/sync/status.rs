use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum SyncPhase {
    Idle,
    FetchingEntities,
    Persisting,
    Complete,
    Failed,
}

/// Point-in-time view of the current sync session.
///
/// Each transition produces a new value; subscribers never see one being
/// edited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub phase: SyncPhase,
    pub progress_percent: u8,
    pub started_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl SyncStatus {
    pub fn idle() -> Self {
        Self {
            phase: SyncPhase::Idle,
            progress_percent: 0,
            started_at: None,
            error: None,
        }
    }

    pub fn fetching(started_at: DateTime<Utc>, progress_percent: u8) -> Self {
        Self {
            phase: SyncPhase::FetchingEntities,
            progress_percent: progress_percent.min(100),
            started_at: Some(started_at),
            error: None,
        }
    }

    pub fn persisting(started_at: DateTime<Utc>, progress_percent: u8) -> Self {
        Self {
            phase: SyncPhase::Persisting,
            progress_percent: progress_percent.min(100),
            started_at: Some(started_at),
            error: None,
        }
    }

    pub fn complete(started_at: DateTime<Utc>) -> Self {
        Self {
            phase: SyncPhase::Complete,
            progress_percent: 100,
            started_at: Some(started_at),
            error: None,
        }
    }

    pub fn failed(started_at: DateTime<Utc>, progress_percent: u8, error: impl Into<String>) -> Self {
        Self {
            phase: SyncPhase::Failed,
            progress_percent: progress_percent.min(100),
            started_at: Some(started_at),
            error: Some(error.into()),
        }
    }

    /// Whether a session is between start and its terminal phase
    pub fn is_active(&self) -> bool {
        matches!(self.phase, SyncPhase::FetchingEntities | SyncPhase::Persisting)
    }
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self::idle()
    }
}

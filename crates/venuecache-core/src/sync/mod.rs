//! Sync orchestration: the state machine, its status broadcast, and the
//! background driver that triggers it.

pub mod auto;
pub mod error;
pub mod orchestrator;
pub mod publisher;
pub mod status;

pub use auto::{AutoSync, DEFAULT_AUTO_SYNC_INTERVAL_SECS};
pub use error::SyncError;
pub use orchestrator::{
    SyncConfig, SyncOrchestrator, SyncOutcome, DEFAULT_SESSION_TIMEOUT_SECS, DEFAULT_STALENESS_DAYS,
};
pub use publisher::{SubscriptionHandle, SyncStatusPublisher};
pub use status::{SyncPhase, SyncStatus};

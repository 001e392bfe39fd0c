use std::time::Duration;

use thiserror::Error;

use crate::models::EntityKind;
use crate::store::StoreError;

/// Why `request_sync` did not produce a new snapshot.
///
/// Every variant is recoverable; the existing cache is left as it was.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("A sync is already in progress")]
    AlreadyInProgress,

    #[error("Offline - using cached data")]
    Offline,

    #[error("Failed to fetch {kind}: {source}")]
    FetchFailed {
        kind: EntityKind,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Failed to persist snapshot: {0}")]
    PersistFailed(#[source] StoreError),

    #[error("Sync did not finish within {0:?}")]
    TimedOut(Duration),
}

//! Persistent storage for the cached snapshot and its binary assets.
//!
//! This module provides the `SnapshotStore` trait and two implementations:
//! - `FileStore`: Durable on-disk store using write-to-temp-then-rename
//! - `MemoryStore`: In-process store for tests and throwaway caches
//!
//! A corrupt snapshot reads back as `None` so the app degrades to "no
//! cache" instead of failing.

pub mod error;
pub mod file;
pub mod memory;

pub use error::StoreError;
pub use file::FileStore;
pub use memory::MemoryStore;

use std::collections::HashSet;

use crate::models::CachedSnapshot;

/// Durable storage for one `CachedSnapshot` plus keyed blobs.
pub trait SnapshotStore: Send + Sync {
    /// Atomically replace the stored snapshot.
    fn write(&self, snapshot: &CachedSnapshot) -> Result<(), StoreError>;

    /// The last committed snapshot, or `None` if there is none or it is unreadable.
    fn read(&self) -> Result<Option<CachedSnapshot>, StoreError>;

    fn write_blob(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError>;

    fn read_blob(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    fn has_blob(&self, key: &str) -> bool;

    /// Commit a sync result as one unit.
    ///
    /// Stores `new_blobs`, atomically replaces the snapshot, then drops every
    /// blob the new snapshot no longer references. The quota is checked once,
    /// up front, against the size the store will have afterwards, so blobs
    /// about to be dropped do not count. Returns the number dropped.
    ///
    /// A failure before the snapshot is replaced leaves the previous snapshot
    /// and all of its blobs readable.
    fn commit(&self, snapshot: &CachedSnapshot, new_blobs: &[(String, Vec<u8>)]) -> Result<usize, StoreError>;

    /// Delete every blob whose key is not in `keep`. Returns the number deleted.
    fn retain_blobs(&self, keep: &HashSet<&str>) -> Result<usize, StoreError>;

    /// Delete the snapshot and every blob.
    fn clear(&self) -> Result<(), StoreError>;

    /// Total bytes currently held, for quota checks.
    fn size_bytes(&self) -> u64;
}

/// Blob keys become file names, so keep them to a safe alphabet.
pub(crate) fn validate_blob_key(key: &str) -> Result<(), StoreError> {
    let valid = !key.is_empty()
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}

/// Fail with `QuotaExceeded` if replacing `existing` bytes with `incoming`
/// bytes would take the store above `limit`.
pub(crate) fn check_quota(
    limit: Option<u64>,
    current: u64,
    existing: u64,
    incoming: u64,
) -> Result<(), StoreError> {
    let Some(limit) = limit else {
        return Ok(());
    };
    let projected = current.saturating_sub(existing).saturating_add(incoming);
    if projected > limit {
        return Err(StoreError::QuotaExceeded(format!(
            "write would use {} bytes, limit is {}",
            projected, limit
        )));
    }
    Ok(())
}

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use super::{check_quota, validate_blob_key, SnapshotStore, StoreError};
use crate::models::CachedSnapshot;

#[derive(Default)]
struct MemoryState {
    snapshot: Option<Vec<u8>>,
    blobs: HashMap<String, Vec<u8>>,
}

impl MemoryState {
    fn size(&self) -> u64 {
        let snapshot = self.snapshot.as_ref().map_or(0, Vec::len);
        let blobs: usize = self.blobs.values().map(Vec::len).sum();
        (snapshot + blobs) as u64
    }
}

/// Store that keeps everything in process memory.
///
/// The snapshot is held in serialized form, so it goes through the same
/// encode/decode path as `FileStore` and corruption can be injected with
/// `put_raw_snapshot`.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    max_bytes: Option<u64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(mut self, max_bytes: Option<u64>) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Replace the stored snapshot bytes verbatim, bypassing encoding.
    pub fn put_raw_snapshot(&self, bytes: Vec<u8>) {
        self.lock().snapshot = Some(bytes);
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SnapshotStore for MemoryStore {
    fn write(&self, snapshot: &CachedSnapshot) -> Result<(), StoreError> {
        let bytes = snapshot.to_bytes()?;
        let mut state = self.lock();
        let existing = state.snapshot.as_ref().map_or(0, Vec::len) as u64;
        check_quota(self.max_bytes, state.size(), existing, bytes.len() as u64)?;
        state.snapshot = Some(bytes);
        Ok(())
    }

    fn read(&self) -> Result<Option<CachedSnapshot>, StoreError> {
        let state = self.lock();
        let Some(bytes) = state.snapshot.as_ref() else {
            return Ok(None);
        };
        match CachedSnapshot::from_bytes(bytes) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable in-memory snapshot");
                Ok(None)
            }
        }
    }

    fn write_blob(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        validate_blob_key(key)?;
        let mut state = self.lock();
        let existing = state.blobs.get(key).map_or(0, Vec::len) as u64;
        check_quota(self.max_bytes, state.size(), existing, bytes.len() as u64)?;
        state.blobs.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn read_blob(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        validate_blob_key(key)?;
        self.lock()
            .blobs
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    fn has_blob(&self, key: &str) -> bool {
        self.lock().blobs.contains_key(key)
    }

    fn commit(&self, snapshot: &CachedSnapshot, new_blobs: &[(String, Vec<u8>)]) -> Result<usize, StoreError> {
        let bytes = snapshot.to_bytes()?;
        for (key, _) in new_blobs {
            validate_blob_key(key)?;
        }
        let keep = snapshot.tile_keys();

        let mut state = self.lock();
        let released: usize = state
            .blobs
            .iter()
            .filter(|(key, _)| {
                !keep.contains(key.as_str()) || new_blobs.iter().any(|(k, _)| k == *key)
            })
            .map(|(_, b)| b.len())
            .sum();
        let existing = (state.snapshot.as_ref().map_or(0, Vec::len) + released) as u64;
        let incoming = bytes.len() + new_blobs.iter().map(|(_, b)| b.len()).sum::<usize>();
        check_quota(self.max_bytes, state.size(), existing, incoming as u64)?;

        for (key, data) in new_blobs {
            state.blobs.insert(key.clone(), data.clone());
        }
        state.snapshot = Some(bytes);
        let before = state.blobs.len();
        state.blobs.retain(|key, _| keep.contains(key.as_str()));
        let dropped = before - state.blobs.len();
        debug!(new_blobs = new_blobs.len(), dropped, "Sync result committed in memory");
        Ok(dropped)
    }

    fn retain_blobs(&self, keep: &HashSet<&str>) -> Result<usize, StoreError> {
        let mut state = self.lock();
        let before = state.blobs.len();
        state.blobs.retain(|key, _| keep.contains(key.as_str()));
        Ok(before - state.blobs.len())
    }

    fn clear(&self) -> Result<(), StoreError> {
        *self.lock() = MemoryState::default();
        Ok(())
    }

    fn size_bytes(&self) -> u64 {
        self.lock().size()
    }
}

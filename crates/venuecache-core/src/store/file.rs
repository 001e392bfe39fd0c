use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::{check_quota, validate_blob_key, SnapshotStore, StoreError};
use crate::models::CachedSnapshot;

/// Snapshot file name in the cache directory
const SNAPSHOT_FILE: &str = "snapshot.json";

/// Subdirectory holding blob files
const BLOB_DIR: &str = "blobs";

/// Suffix for in-progress writes; never read back
const TEMP_SUFFIX: &str = ".tmp";

/// On-disk store rooted at a cache directory.
///
/// Layout: `snapshot.json` plus `blobs/<key>`. Every file is written to a
/// sibling `.tmp` file, flushed, then renamed over the target, so a crash
/// mid-write leaves the previous file intact.
pub struct FileStore {
    root: PathBuf,
    max_bytes: Option<u64>,
}

impl FileStore {
    pub fn new(root: PathBuf) -> Result<Self, StoreError> {
        fs::create_dir_all(root.join(BLOB_DIR))?;
        Ok(Self {
            root,
            max_bytes: None,
        })
    }

    /// Cap the total bytes the store may hold.
    pub fn with_quota(mut self, max_bytes: Option<u64>) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.root.join(SNAPSHOT_FILE)
    }

    fn blob_path(&self, key: &str) -> Result<PathBuf, StoreError> {
        validate_blob_key(key)?;
        Ok(self.root.join(BLOB_DIR).join(key))
    }

    fn file_len(path: &Path) -> u64 {
        fs::metadata(path).map(|m| m.len()).unwrap_or(0)
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
        check_quota(
            self.max_bytes,
            self.size_bytes(),
            Self::file_len(path),
            bytes.len() as u64,
        )?;
        Self::write_file(path, bytes)
    }

    /// Write through a sibling temp file; no quota check.
    fn write_file(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| StoreError::InvalidKey(path.display().to_string()))?;
        let temp_path = path.with_file_name(format!("{}{}", file_name, TEMP_SUFFIX));

        let result = Self::write_and_rename(&temp_path, path, bytes);
        if result.is_err() {
            if let Err(e) = fs::remove_file(&temp_path) {
                debug!(path = %temp_path.display(), error = %e, "Temp file cleanup failed");
            }
        }
        result.map_err(StoreError::from)
    }

    fn is_temp(path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .map_or(false, |n| n.ends_with(TEMP_SUFFIX))
    }

    /// Committed blobs and their sizes. Temp files are not blobs.
    fn blob_sizes(&self) -> Result<HashMap<String, u64>, StoreError> {
        let mut sizes = HashMap::new();
        for entry in fs::read_dir(self.root.join(BLOB_DIR))? {
            let entry = entry?;
            let meta = entry.metadata()?;
            if !meta.is_file() || Self::is_temp(&entry.path()) {
                continue;
            }
            if let Some(key) = entry.file_name().to_str() {
                sizes.insert(key.to_string(), meta.len());
            }
        }
        Ok(sizes)
    }

    fn write_and_rename(temp_path: &Path, path: &Path, bytes: &[u8]) -> io::Result<()> {
        let mut temp_file = File::create(temp_path)?;
        temp_file.write_all(bytes)?;
        temp_file.sync_all()?;
        drop(temp_file);

        fs::rename(temp_path, path)?;

        // Persist the rename itself
        #[cfg(unix)]
        {
            if let Some(parent) = path.parent() {
                File::open(parent)?.sync_all()?;
            }
        }
        Ok(())
    }

    fn dir_size(path: &Path) -> u64 {
        let Ok(entries) = fs::read_dir(path) else {
            return 0;
        };
        entries
            .flatten()
            .map(|entry| match entry.metadata() {
                Ok(meta) if meta.is_dir() => Self::dir_size(&entry.path()),
                Ok(_) if Self::is_temp(&entry.path()) => 0,
                Ok(meta) => meta.len(),
                Err(_) => 0,
            })
            .sum()
    }
}

impl SnapshotStore for FileStore {
    fn write(&self, snapshot: &CachedSnapshot) -> Result<(), StoreError> {
        let bytes = snapshot.to_bytes()?;
        self.write_atomic(&self.snapshot_path(), &bytes)?;
        debug!(
            bytes = bytes.len(),
            synced_at = %snapshot.last_synced_at,
            "Snapshot committed"
        );
        Ok(())
    }

    fn read(&self) -> Result<Option<CachedSnapshot>, StoreError> {
        let path = self.snapshot_path();
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match CachedSnapshot::from_bytes(&bytes) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring unreadable snapshot");
                Ok(None)
            }
        }
    }

    fn write_blob(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let path = self.blob_path(key)?;
        self.write_atomic(&path, bytes)
    }

    fn read_blob(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.blob_path(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn has_blob(&self, key: &str) -> bool {
        self.blob_path(key).map(|p| p.is_file()).unwrap_or(false)
    }

    fn commit(&self, snapshot: &CachedSnapshot, new_blobs: &[(String, Vec<u8>)]) -> Result<usize, StoreError> {
        let bytes = snapshot.to_bytes()?;
        let keep = snapshot.tile_keys();
        let blob_paths = new_blobs
            .iter()
            .map(|(key, _)| self.blob_path(key))
            .collect::<Result<Vec<_>, _>>()?;

        // One directory walk for the whole commit. Blobs this commit drops or
        // overwrites do not count against the quota.
        let incoming_keys: HashSet<&str> = new_blobs.iter().map(|(k, _)| k.as_str()).collect();
        let stored = self.blob_sizes()?;
        let snapshot_len = Self::file_len(&self.snapshot_path());
        let released: u64 = stored
            .iter()
            .filter(|(key, _)| !keep.contains(key.as_str()) || incoming_keys.contains(key.as_str()))
            .map(|(_, len)| len)
            .sum();
        let incoming = bytes.len() as u64 + new_blobs.iter().map(|(_, b)| b.len() as u64).sum::<u64>();
        check_quota(
            self.max_bytes,
            snapshot_len + stored.values().sum::<u64>(),
            snapshot_len + released,
            incoming,
        )?;

        for (path, (_, data)) in blob_paths.iter().zip(new_blobs) {
            Self::write_file(path, data)?;
        }
        Self::write_file(&self.snapshot_path(), &bytes)?;

        let dropped = match self.retain_blobs(&keep) {
            Ok(dropped) => dropped,
            Err(e) => {
                // The snapshot is committed; leftovers go on the next commit
                warn!(error = %e, "Failed to drop unreferenced blobs");
                0
            }
        };
        debug!(
            bytes = bytes.len(),
            new_blobs = new_blobs.len(),
            dropped,
            "Sync result committed"
        );
        Ok(dropped)
    }

    fn retain_blobs(&self, keep: &HashSet<&str>) -> Result<usize, StoreError> {
        let mut dropped = 0;
        for key in self.blob_sizes()?.into_keys() {
            if keep.contains(key.as_str()) {
                continue;
            }
            match fs::remove_file(self.root.join(BLOB_DIR).join(&key)) {
                Ok(()) => dropped += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(dropped)
    }

    fn clear(&self) -> Result<(), StoreError> {
        match fs::remove_dir_all(&self.root) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        fs::create_dir_all(self.root.join(BLOB_DIR))?;
        debug!(root = %self.root.display(), "Cache cleared");
        Ok(())
    }

    fn size_bytes(&self) -> u64 {
        Self::dir_size(&self.root)
    }
}

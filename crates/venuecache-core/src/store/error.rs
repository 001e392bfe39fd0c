use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Cached data is corrupt: {0}")]
    Corrupt(String),

    #[error("Storage I/O failure: {0}")]
    IoFailure(#[source] io::Error),

    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("Invalid blob key: {0}")]
    InvalidKey(String),
}

impl From<io::Error> for StoreError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::StorageFull => StoreError::QuotaExceeded(err.to_string()),
            _ => StoreError::IoFailure(err),
        }
    }
}

//! Remote data sources for the sync.
//!
//! `RemoteProvider` is what the orchestrator fetches from. Each fetch
//! returns the complete current set for its entity kind; the cache never
//! asks for deltas. `HttpProvider` implements it over a JSON REST API.

pub mod error;
pub mod http;

pub use error::ProviderError;
pub use http::HttpProvider;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{MapRecord, RouteRecord, VenueRecord};

#[async_trait]
pub trait RemoteProvider: Send + Sync {
    async fn fetch_venues(&self) -> Result<Vec<VenueRecord>>;

    async fn fetch_maps(&self) -> Result<Vec<MapRecord>>;

    async fn fetch_routes(&self) -> Result<Vec<RouteRecord>>;

    /// Fetch a binary asset referenced from a record (e.g. a map tile).
    /// `Ok(None)` means the provider has no such asset.
    async fn fetch_blob(&self, _key: &str) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }
}

//! Offline-first venue cache.
//!
//! Keeps a local snapshot of venues, floor maps and routes so they can be
//! browsed without connectivity, and refreshes it from a remote provider
//! when the device is online and the snapshot has gone stale.
//!
//! The pieces are wired together by the caller:
//!
//! - [`store::SnapshotStore`] persists the snapshot atomically
//! - [`network::NetworkMonitor`] tracks connectivity
//! - [`provider::RemoteProvider`] fetches entity groups
//! - [`sync::SyncOrchestrator`] runs one sync session at a time
//! - [`sync::SyncStatusPublisher`] broadcasts session progress
//! - [`cache::CacheAccessor`] serves reads from the last committed snapshot

pub mod cache;
pub mod config;
pub mod models;
pub mod network;
pub mod provider;
pub mod store;
pub mod sync;

pub use cache::CacheAccessor;
pub use config::CacheConfig;
pub use models::{CachedSnapshot, EntityKind, MapRecord, RouteRecord, VenueRecord};
pub use network::{ConnectivityStatus, NetworkMonitor, TcpProbe};
pub use provider::{HttpProvider, RemoteProvider};
pub use store::{FileStore, MemoryStore, SnapshotStore, StoreError};
pub use sync::{SyncError, SyncOrchestrator, SyncOutcome, SyncPhase, SyncStatus, SyncStatusPublisher};

//! The sync state machine.
//!
//! `SyncOrchestrator::request_sync` decides whether the cached snapshot
//! needs refreshing, fetches every entity group from the remote provider,
//! and commits the result as one new snapshot together with its map tiles:
//!
//! ```text
//! Idle -> FetchingEntities -> Persisting -> Complete -> Idle
//!              \                  \
//!               +------------------+--> Failed -> Idle
//! ```
//!
//! At most one session runs at a time. A failure at any step leaves the
//! previously committed snapshot in place.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use tracing::{debug, info, warn};

use super::{SyncError, SyncPhase, SyncStatus, SyncStatusPublisher};
use crate::cache::CacheAccessor;
use crate::models::{CachedSnapshot, DomainEntities, EntityKind, MapRecord, RouteRecord, VenueRecord};
use crate::network::NetworkMonitor;
use crate::provider::{ProviderError, RemoteProvider};
use crate::store::{validate_blob_key, SnapshotStore, StoreError};

/// Snapshots older than this are refreshed by a non-forced sync.
pub const DEFAULT_STALENESS_DAYS: i64 = 7;

/// Ceiling on one session, after which it is failed and the guard released.
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 120;

/// Progress reported as the first, second and third entity group arrives
const FETCH_CHECKPOINTS: [u8; 3] = [20, 50, 80];

/// Progress reported on entering `Persisting`
const PERSIST_PROGRESS: u8 = 80;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub staleness_threshold: chrono::Duration,
    pub session_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            staleness_threshold: chrono::Duration::days(DEFAULT_STALENESS_DAYS),
            session_timeout: Duration::from_secs(DEFAULT_SESSION_TIMEOUT_SECS),
        }
    }
}

/// What a successful `request_sync` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The cache was within the staleness window; nothing fetched.
    Fresh { last_synced_at: DateTime<Utc> },
    /// A new snapshot was committed.
    Synced {
        last_synced_at: DateTime<Utc>,
        venues: usize,
        maps: usize,
        routes: usize,
        blobs: usize,
    },
}

enum FetchedGroup {
    Venues(Vec<VenueRecord>),
    Maps(Vec<MapRecord>),
    Routes(Vec<RouteRecord>),
}

impl FetchedGroup {
    fn len(&self) -> usize {
        match self {
            FetchedGroup::Venues(v) => v.len(),
            FetchedGroup::Maps(m) => m.len(),
            FetchedGroup::Routes(r) => r.len(),
        }
    }
}

type FetchFuture<'a> = BoxFuture<'a, (EntityKind, anyhow::Result<FetchedGroup>)>;

pub struct SyncOrchestrator {
    store: Arc<dyn SnapshotStore>,
    network: Arc<NetworkMonitor>,
    provider: Arc<dyn RemoteProvider>,
    publisher: Arc<SyncStatusPublisher>,
    accessor: CacheAccessor,
    config: SyncConfig,
    active: AtomicBool,
    status: Mutex<SyncStatus>,
}

impl SyncOrchestrator {
    pub fn new(
        store: Arc<dyn SnapshotStore>,
        network: Arc<NetworkMonitor>,
        provider: Arc<dyn RemoteProvider>,
        publisher: Arc<SyncStatusPublisher>,
        accessor: CacheAccessor,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            network,
            provider,
            publisher,
            accessor,
            config,
            active: AtomicBool::new(false),
            status: Mutex::new(SyncStatus::idle()),
        }
    }

    pub fn status(&self) -> SyncStatus {
        self.status_lock().clone()
    }

    pub fn is_syncing(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Refresh the cache from the remote provider.
    ///
    /// Without `force`, a snapshot younger than the staleness threshold is
    /// kept and an offline device returns `SyncError::Offline` without
    /// fetching. A call made while another session is running returns
    /// `SyncError::AlreadyInProgress` at once.
    pub async fn request_sync(&self, force: bool) -> Result<SyncOutcome, SyncError> {
        let Some(mut guard) = SessionGuard::acquire(self) else {
            debug!("Sync requested while one is running, ignoring");
            return Err(SyncError::AlreadyInProgress);
        };

        if !force {
            if let Some(last_synced_at) = self.last_synced_at() {
                if Utc::now() - last_synced_at < self.config.staleness_threshold {
                    debug!(%last_synced_at, "Cache is fresh, skipping sync");
                    return Ok(SyncOutcome::Fresh { last_synced_at });
                }
            }
            if !self.network.is_online() {
                debug!("Offline, skipping sync");
                return Err(SyncError::Offline);
            }
        }

        let started_at = guard.begin();
        info!(force, "Sync started");

        let result = match tokio::time::timeout(self.config.session_timeout, self.run_session(started_at)).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::TimedOut(self.config.session_timeout)),
        };

        match result {
            Ok(outcome) => {
                info!(?outcome, "Sync complete");
                guard.finish(SyncStatus::complete(started_at));
                Ok(outcome)
            }
            Err(e) => {
                warn!(error = %e, "Sync failed, keeping cached data");
                let progress = self.status().progress_percent;
                guard.finish(SyncStatus::failed(started_at, progress, e.to_string()));
                Err(e)
            }
        }
    }

    /// Wipe the store and the in-memory snapshot.
    /// Refused with `AlreadyInProgress` while a sync is running.
    pub fn clear_cache(&self) -> Result<(), SyncError> {
        let Some(_guard) = SessionGuard::acquire(self) else {
            return Err(SyncError::AlreadyInProgress);
        };
        self.store.clear().map_err(SyncError::PersistFailed)?;
        self.accessor.reset();
        info!("Cache cleared");
        Ok(())
    }

    /// Timestamp of the committed snapshot; unreadable counts as never synced.
    fn last_synced_at(&self) -> Option<DateTime<Utc>> {
        match self.store.read() {
            Ok(snapshot) => snapshot.map(|s| s.last_synced_at),
            Err(e) => {
                debug!(error = %e, "Failed to read snapshot for staleness check");
                None
            }
        }
    }

    async fn run_session(&self, started_at: DateTime<Utc>) -> Result<SyncOutcome, SyncError> {
        let entities = self.fetch_all(started_at).await?;

        self.set_status(SyncStatus::persisting(started_at, PERSIST_PROGRESS));
        let tiles = self.prefetch_blobs(&entities.maps).await;

        let snapshot = CachedSnapshot::new(entities);
        let dropped = self
            .store
            .commit(&snapshot, &tiles)
            .map_err(SyncError::PersistFailed)?;
        if dropped > 0 {
            debug!(dropped, "Removed tiles no longer referenced");
        }

        let outcome = SyncOutcome::Synced {
            last_synced_at: snapshot.last_synced_at,
            venues: snapshot.entities.venues.len(),
            maps: snapshot.entities.maps.len(),
            routes: snapshot.entities.routes.len(),
            blobs: tiles.len(),
        };
        self.accessor.publish(Arc::new(snapshot));
        Ok(outcome)
    }

    /// Fetch every group concurrently; the first failure abandons the rest.
    async fn fetch_all(&self, started_at: DateTime<Utc>) -> Result<DomainEntities, SyncError> {
        let provider = &self.provider;
        let mut pending: FuturesUnordered<FetchFuture<'_>> = FuturesUnordered::new();
        pending.push(
            async move { (EntityKind::Venues, provider.fetch_venues().await.map(FetchedGroup::Venues)) }
                .boxed(),
        );
        pending.push(
            async move { (EntityKind::Maps, provider.fetch_maps().await.map(FetchedGroup::Maps)) }.boxed(),
        );
        pending.push(
            async move { (EntityKind::Routes, provider.fetch_routes().await.map(FetchedGroup::Routes)) }
                .boxed(),
        );

        let mut checkpoints = FETCH_CHECKPOINTS.iter();
        let mut fetched = DomainEntities::default();

        while let Some((kind, result)) = pending.next().await {
            let group = result.map_err(|e| {
                warn!(kind = %kind, error = %e, "Fetch failed");
                SyncError::FetchFailed {
                    kind,
                    source: e.into(),
                }
            })?;
            debug!(kind = %kind, count = group.len(), "Fetched");

            match group {
                FetchedGroup::Venues(v) => fetched.venues = v,
                FetchedGroup::Maps(m) => fetched.maps = m,
                FetchedGroup::Routes(r) => fetched.routes = r,
            }
            if let Some(&progress) = checkpoints.next() {
                self.set_status(SyncStatus::fetching(started_at, progress));
            }
        }

        Ok(DomainEntities::new(fetched.venues, fetched.maps, fetched.routes))
    }

    /// Download map tiles the store does not have yet.
    ///
    /// Nothing is written here; the tiles are committed with the snapshot.
    /// A tile the provider cannot serve is skipped.
    async fn prefetch_blobs(&self, maps: &[MapRecord]) -> Vec<(String, Vec<u8>)> {
        let mut seen = HashSet::new();
        let mut tiles = Vec::new();
        for map in maps {
            let Some(key) = map.tile_key.as_deref() else {
                continue;
            };
            if let Err(e) = validate_blob_key(key) {
                warn!(map = %map.id, error = %e, "Skipping tile with unusable key");
                continue;
            }
            if !seen.insert(key) || self.store.has_blob(key) {
                continue;
            }

            match self.provider.fetch_blob(key).await {
                Ok(Some(bytes)) => tiles.push((key.to_string(), bytes)),
                Ok(None) => debug!(key, "Provider has no tile"),
                Err(e) => {
                    let transient = e
                        .downcast_ref::<ProviderError>()
                        .map_or(false, ProviderError::is_transient);
                    warn!(key, transient, error = %e, "Tile download failed, continuing without it");
                }
            }
        }
        tiles
    }

    fn set_status(&self, status: SyncStatus) {
        *self.status_lock() = status.clone();
        self.publisher.publish(&status);
    }

    fn status_lock(&self) -> MutexGuard<'_, SyncStatus> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Holds the single-session flag for the lifetime of one `request_sync`.
///
/// Dropping a guard whose session never reached a terminal phase (the
/// future was cancelled) reports `Failed` before releasing the flag.
struct SessionGuard<'a> {
    orchestrator: &'a SyncOrchestrator,
    started_at: Option<DateTime<Utc>>,
    finished: bool,
}

impl<'a> SessionGuard<'a> {
    fn acquire(orchestrator: &'a SyncOrchestrator) -> Option<Self> {
        orchestrator
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self {
                orchestrator,
                started_at: None,
                finished: false,
            })
    }

    fn begin(&mut self) -> DateTime<Utc> {
        let started_at = Utc::now();
        self.started_at = Some(started_at);
        self.orchestrator.set_status(SyncStatus::fetching(started_at, 0));
        started_at
    }

    fn finish(&mut self, terminal: SyncStatus) {
        debug_assert!(matches!(terminal.phase, SyncPhase::Complete | SyncPhase::Failed));
        self.finished = true;
        self.orchestrator.set_status(terminal);
        self.orchestrator.set_status(SyncStatus::idle());
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        if let (Some(started_at), false) = (self.started_at, self.finished) {
            warn!("Sync abandoned before finishing");
            let progress = self.orchestrator.status().progress_percent;
            self.orchestrator
                .set_status(SyncStatus::failed(started_at, progress, "sync abandoned"));
            self.orchestrator.set_status(SyncStatus::idle());
        }
        self.orchestrator.active.store(false, Ordering::Release);
    }
}

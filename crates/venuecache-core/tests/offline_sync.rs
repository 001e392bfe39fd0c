use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tempfile::TempDir;
use tokio::sync::{Notify, Semaphore};

use venuecache_core::models::DomainEntities;
use venuecache_core::network::ConnectivityProbe;
use venuecache_core::sync::{AutoSync, SyncConfig};
use venuecache_core::{
    CacheAccessor, CachedSnapshot, ConnectivityStatus, EntityKind, FileStore, MapRecord,
    MemoryStore, NetworkMonitor, RemoteProvider, RouteRecord, SnapshotStore, StoreError,
    SyncError, SyncOrchestrator, SyncOutcome, SyncPhase, SyncStatus, SyncStatusPublisher,
    VenueRecord,
};

// ============================================================================
// Fixtures
// ============================================================================

fn venue(id: &str, name: &str) -> VenueRecord {
    serde_json::from_value(serde_json::json!({ "id": id, "name": name, "city": "Johannesburg" })).unwrap()
}

fn map(id: &str, venue_id: &str, tile_key: Option<&str>) -> MapRecord {
    serde_json::from_value(serde_json::json!({
        "id": id,
        "venueId": venue_id,
        "floor": 0,
        "tileKey": tile_key,
    }))
    .unwrap()
}

fn route(id: &str, venue_id: &str, map_id: &str) -> RouteRecord {
    serde_json::from_value(serde_json::json!({
        "id": id,
        "venueId": venue_id,
        "mapId": map_id,
        "name": "Entrance to food court",
    }))
    .unwrap()
}

/// Snapshot standing in for data committed by an earlier sync.
fn old_snapshot(age: chrono::Duration) -> CachedSnapshot {
    let mut snapshot = CachedSnapshot::new(DomainEntities::new(
        vec![venue("old-venue", "Old Mall")],
        vec![],
        vec![],
    ));
    snapshot.last_synced_at = Utc::now() - age;
    snapshot
}

struct FakeProvider {
    venues: Vec<VenueRecord>,
    /// Behind a lock so a test can publish a new map revision between syncs.
    maps: Mutex<Vec<MapRecord>>,
    routes: Vec<RouteRecord>,
    blobs: HashMap<String, Vec<u8>>,
    fail_maps: AtomicBool,
    venue_calls: AtomicUsize,
    total_calls: AtomicUsize,
    /// When set, `fetch_venues` signals `started` and then waits for a permit.
    gate: Option<(Notify, Semaphore)>,
}

impl FakeProvider {
    fn new() -> Self {
        Self {
            venues: vec![venue("v1", "Sandton City"), venue("v2", "Menlyn Park")],
            maps: Mutex::new(vec![
                map("m1", "v1", Some("v1-ground.png")),
                map("m2", "v2", Some("../escape")),
                map("m3", "v2", None),
            ]),
            routes: vec![route("r1", "v1", "m1")],
            blobs: HashMap::from([("v1-ground.png".to_string(), b"PNGDATA".to_vec())]),
            fail_maps: AtomicBool::new(false),
            venue_calls: AtomicUsize::new(0),
            total_calls: AtomicUsize::new(0),
            gate: None,
        }
    }

    fn gated() -> Self {
        Self {
            gate: Some((Notify::new(), Semaphore::new(0))),
            ..Self::new()
        }
    }

    fn failing_maps() -> Self {
        let provider = Self::new();
        provider.fail_maps.store(true, Ordering::SeqCst);
        provider
    }

    fn calls(&self) -> usize {
        self.total_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteProvider for FakeProvider {
    async fn fetch_venues(&self) -> Result<Vec<VenueRecord>> {
        self.total_calls.fetch_add(1, Ordering::SeqCst);
        self.venue_calls.fetch_add(1, Ordering::SeqCst);
        if let Some((started, release)) = &self.gate {
            started.notify_one();
            let _permit = release.acquire().await?;
        }
        Ok(self.venues.clone())
    }

    async fn fetch_maps(&self) -> Result<Vec<MapRecord>> {
        self.total_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_maps.load(Ordering::SeqCst) {
            anyhow::bail!("maps endpoint returned 503");
        }
        Ok(self.maps.lock().unwrap().clone())
    }

    async fn fetch_routes(&self) -> Result<Vec<RouteRecord>> {
        self.total_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.routes.clone())
    }

    async fn fetch_blob(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.get(key).cloned())
    }
}

struct FixedProbe(bool);

#[async_trait]
impl ConnectivityProbe for FixedProbe {
    async fn check(&self) -> bool {
        self.0
    }
}

struct Harness {
    orchestrator: Arc<SyncOrchestrator>,
    store: Arc<dyn SnapshotStore>,
    network: Arc<NetworkMonitor>,
    provider: Arc<FakeProvider>,
    publisher: Arc<SyncStatusPublisher>,
    accessor: CacheAccessor,
}

impl Harness {
    fn new(store: Arc<dyn SnapshotStore>, provider: FakeProvider, status: ConnectivityStatus) -> Self {
        let network = Arc::new(NetworkMonitor::new(Arc::new(FixedProbe(true)), status));
        let provider = Arc::new(provider);
        let publisher = Arc::new(SyncStatusPublisher::new());
        let accessor = CacheAccessor::load(store.as_ref());
        let orchestrator = Arc::new(SyncOrchestrator::new(
            Arc::clone(&store),
            Arc::clone(&network),
            provider.clone(),
            Arc::clone(&publisher),
            accessor.clone(),
            SyncConfig::default(),
        ));
        Self {
            orchestrator,
            store,
            network,
            provider,
            publisher,
            accessor,
        }
    }

    fn online(provider: FakeProvider) -> Self {
        Self::new(Arc::new(MemoryStore::new()), provider, ConnectivityStatus::Online)
    }

    fn record_statuses(&self) -> Arc<Mutex<Vec<SyncStatus>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        self.publisher.subscribe(move |s| sink.lock().unwrap().push(s.clone()));
        seen
    }
}

fn phases(statuses: &Mutex<Vec<SyncStatus>>) -> Vec<SyncPhase> {
    statuses.lock().unwrap().iter().map(|s| s.phase).collect()
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

// ============================================================================
// Atomicity
// ============================================================================

#[tokio::test]
async fn test_failed_fetch_leaves_previous_snapshot_untouched() {
    let store = Arc::new(MemoryStore::new());
    let previous = old_snapshot(chrono::Duration::days(30));
    store.write(&previous).unwrap();
    let h = Harness::new(store, FakeProvider::failing_maps(), ConnectivityStatus::Online);

    let result = h.orchestrator.request_sync(true).await;

    assert!(matches!(
        result,
        Err(SyncError::FetchFailed {
            kind: EntityKind::Maps,
            ..
        })
    ));
    assert_eq!(h.store.read().unwrap(), Some(previous));
    let names: Vec<String> = h.accessor.entities::<VenueRecord>().into_iter().map(|v| v.name).collect();
    assert_eq!(names, vec!["Old Mall"]);
}

#[tokio::test]
async fn test_quota_failure_keeps_previous_snapshot() {
    let store = Arc::new(MemoryStore::new().with_quota(Some(1024)));
    let previous = old_snapshot(chrono::Duration::days(30));
    store.write(&previous).unwrap();

    let mut provider = FakeProvider::new();
    provider.venues = (0..50)
        .map(|i| venue(&format!("v{}", i), &format!("Regional Shopping Centre number {}", i)))
        .collect();
    let h = Harness::new(store, provider, ConnectivityStatus::Online);
    let statuses = h.record_statuses();

    let result = h.orchestrator.request_sync(true).await;

    assert!(matches!(
        result,
        Err(SyncError::PersistFailed(StoreError::QuotaExceeded(_)))
    ));
    assert_eq!(h.store.read().unwrap(), Some(previous));
    assert_eq!(h.accessor.count(EntityKind::Venues), 1);
    assert_eq!(
        phases(&statuses).iter().rev().take(2).copied().collect::<Vec<_>>(),
        vec![SyncPhase::Idle, SyncPhase::Failed]
    );
}

#[tokio::test]
async fn test_new_tile_revision_replaces_old_under_tight_quota() {
    // Room for the snapshot and one tile, never two tiles at once
    let store = Arc::new(MemoryStore::new().with_quota(Some(12_000)));
    let mut provider = FakeProvider::new();
    provider.maps = Mutex::new(vec![map("m1", "v1", Some("tile-gen1"))]);
    provider.blobs = HashMap::from([
        ("tile-gen1".to_string(), vec![1u8; 8_000]),
        ("tile-gen2".to_string(), vec![2u8; 8_000]),
    ]);
    let h = Harness::new(store, provider, ConnectivityStatus::Online);

    h.orchestrator.request_sync(true).await.unwrap();
    assert!(h.store.has_blob("tile-gen1"));

    *h.provider.maps.lock().unwrap() = vec![map("m1", "v1", Some("tile-gen2"))];
    let result = h.orchestrator.request_sync(true).await;

    assert!(matches!(result, Ok(SyncOutcome::Synced { blobs: 1, .. })));
    assert!(!h.store.has_blob("tile-gen1"));
    assert_eq!(h.store.read_blob("tile-gen2").unwrap(), vec![2u8; 8_000]);
    assert!(h.store.size_bytes() <= 12_000);
    let tiles: Vec<Option<String>> = h
        .accessor
        .entities::<MapRecord>()
        .into_iter()
        .map(|m| m.tile_key)
        .collect();
    assert_eq!(tiles, vec![Some("tile-gen2".to_string())]);
}

#[tokio::test]
async fn test_unchanged_tiles_are_not_downloaded_again() {
    let h = Harness::online(FakeProvider::new());
    let first = h.orchestrator.request_sync(true).await.unwrap();
    let second = h.orchestrator.request_sync(true).await.unwrap();

    assert!(matches!(first, SyncOutcome::Synced { blobs: 1, .. }));
    assert!(matches!(second, SyncOutcome::Synced { blobs: 0, .. }));
    assert!(h.store.has_blob("v1-ground.png"));
}

// ============================================================================
// Mutual exclusion
// ============================================================================

#[tokio::test]
async fn test_concurrent_requests_run_one_session() {
    let h = Harness::online(FakeProvider::gated());

    let first = {
        let orchestrator = Arc::clone(&h.orchestrator);
        tokio::spawn(async move { orchestrator.request_sync(true).await })
    };

    let (started, release) = h.provider.gate.as_ref().unwrap();
    started.notified().await;
    assert!(h.orchestrator.is_syncing());

    let second = h.orchestrator.request_sync(true).await;
    assert!(matches!(second, Err(SyncError::AlreadyInProgress)));
    assert!(h.orchestrator.clear_cache().is_err());

    release.add_permits(1);
    let first = first.await.unwrap();
    assert!(matches!(first, Ok(SyncOutcome::Synced { .. })));
    assert_eq!(h.provider.venue_calls.load(Ordering::SeqCst), 1);
    assert!(!h.orchestrator.is_syncing());
}

#[tokio::test]
async fn test_subscribers_see_session_active_until_idle() {
    let h = Harness::online(FakeProvider::new());
    let nested: Arc<Mutex<Vec<bool>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&nested);
    let orchestrator = Arc::downgrade(&h.orchestrator);
    h.publisher.subscribe(move |_| {
        if let Some(orchestrator) = orchestrator.upgrade() {
            sink.lock().unwrap().push(orchestrator.is_syncing());
        }
    });

    h.orchestrator.request_sync(true).await.unwrap();

    let nested = nested.lock().unwrap();
    assert!(!nested.is_empty());
    assert!(nested.iter().all(|syncing| *syncing));
}

// ============================================================================
// Staleness gating
// ============================================================================

#[tokio::test]
async fn test_fresh_cache_skips_fetch() {
    let store = Arc::new(MemoryStore::new());
    store.write(&old_snapshot(chrono::Duration::days(1))).unwrap();
    let h = Harness::new(store, FakeProvider::new(), ConnectivityStatus::Online);
    let statuses = h.record_statuses();

    let result = h.orchestrator.request_sync(false).await.unwrap();

    assert!(matches!(result, SyncOutcome::Fresh { .. }));
    assert_eq!(h.provider.calls(), 0);
    assert!(statuses.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_stale_cache_is_refreshed() {
    let store = Arc::new(MemoryStore::new());
    store.write(&old_snapshot(chrono::Duration::days(8))).unwrap();
    let h = Harness::new(store, FakeProvider::new(), ConnectivityStatus::Online);

    let result = h.orchestrator.request_sync(false).await.unwrap();

    assert!(matches!(result, SyncOutcome::Synced { venues: 2, .. }));
    assert_eq!(h.provider.calls(), 3);
    assert!(h.accessor.find::<VenueRecord>("old-venue").is_none());
}

#[tokio::test]
async fn test_force_ignores_freshness() {
    let store = Arc::new(MemoryStore::new());
    store.write(&old_snapshot(chrono::Duration::hours(1))).unwrap();
    let h = Harness::new(store, FakeProvider::new(), ConnectivityStatus::Online);

    let result = h.orchestrator.request_sync(true).await.unwrap();
    assert!(matches!(result, SyncOutcome::Synced { .. }));
}

// ============================================================================
// Offline short-circuit
// ============================================================================

#[tokio::test]
async fn test_offline_returns_immediately_with_cache_intact() {
    let store = Arc::new(MemoryStore::new());
    store.write(&old_snapshot(chrono::Duration::days(30))).unwrap();
    let h = Harness::new(store, FakeProvider::new(), ConnectivityStatus::Offline);
    let statuses = h.record_statuses();

    let result = h.orchestrator.request_sync(false).await;

    assert!(matches!(result, Err(SyncError::Offline)));
    assert_eq!(h.provider.calls(), 0);
    assert!(statuses.lock().unwrap().is_empty());
    assert_eq!(h.orchestrator.status().phase, SyncPhase::Idle);
    assert_eq!(h.accessor.count(EntityKind::Venues), 1);
}

#[tokio::test]
async fn test_forced_sync_attempts_fetch_while_offline() {
    let h = Harness::new(Arc::new(MemoryStore::new()), FakeProvider::new(), ConnectivityStatus::Offline);
    let result = h.orchestrator.request_sync(true).await;
    assert!(result.is_ok());
    assert_eq!(h.provider.calls(), 3);
}

// ============================================================================
// Fail-safe partial fetch
// ============================================================================

#[tokio::test]
async fn test_partial_fetch_failure_reports_failed_then_idle() {
    let h = Harness::online(FakeProvider::failing_maps());
    let statuses = h.record_statuses();

    let result = h.orchestrator.request_sync(true).await;
    assert!(result.is_err());
    assert!(h.store.read().unwrap().is_none());
    assert!(!h.accessor.is_populated());

    let statuses = statuses.lock().unwrap();
    let failed = statuses
        .iter()
        .find(|s| s.phase == SyncPhase::Failed)
        .expect("a Failed status");
    assert!(failed.error.as_deref().unwrap().contains("503"));
    assert_eq!(statuses.last().unwrap().phase, SyncPhase::Idle);
    assert!(statuses.iter().all(|s| s.phase != SyncPhase::Persisting));
    assert!(statuses.iter().all(|s| s.phase != SyncPhase::Complete));
}

// ============================================================================
// Subscriber isolation
// ============================================================================

#[tokio::test]
async fn test_panicking_subscriber_does_not_starve_others() {
    let h = Harness::online(FakeProvider::new());
    h.publisher.subscribe(|_| panic!("indicator crashed"));
    let statuses = h.record_statuses();

    h.orchestrator.request_sync(true).await.unwrap();

    assert_eq!(
        phases(&statuses),
        vec![
            SyncPhase::FetchingEntities,
            SyncPhase::FetchingEntities,
            SyncPhase::FetchingEntities,
            SyncPhase::FetchingEntities,
            SyncPhase::Persisting,
            SyncPhase::Complete,
            SyncPhase::Idle,
        ]
    );
    let progress: Vec<u8> = statuses.lock().unwrap().iter().map(|s| s.progress_percent).collect();
    assert_eq!(progress, vec![0, 20, 50, 80, 80, 100, 0]);
}

// ============================================================================
// End to end
// ============================================================================

#[tokio::test]
async fn test_sync_then_read_back_after_restart() {
    let dir = TempDir::new().unwrap();
    {
        let store = Arc::new(FileStore::new(dir.path().to_path_buf()).unwrap());
        let h = Harness::new(store, FakeProvider::new(), ConnectivityStatus::Online);
        let outcome = h.orchestrator.request_sync(false).await.unwrap();
        assert_eq!(
            outcome,
            SyncOutcome::Synced {
                last_synced_at: h.accessor.last_synced_at().unwrap(),
                venues: 2,
                maps: 3,
                routes: 1,
                blobs: 1,
            }
        );
    }

    let store = FileStore::new(dir.path().to_path_buf()).unwrap();
    let accessor = CacheAccessor::load(&store);
    let provider = FakeProvider::new();

    assert_eq!(accessor.entities::<VenueRecord>(), provider.venues);
    assert_eq!(accessor.entities::<MapRecord>(), *provider.maps.lock().unwrap());
    assert_eq!(accessor.entities::<RouteRecord>(), provider.routes);
    assert_eq!(accessor.for_venue::<MapRecord>("v2").len(), 2);
    assert_eq!(accessor.age_display(), "just now");

    assert_eq!(store.read_blob("v1-ground.png").unwrap(), b"PNGDATA");
    assert!(!store.has_blob("../escape"));
}

#[tokio::test]
async fn test_clear_cache_empties_store_and_accessor() {
    let h = Harness::online(FakeProvider::new());
    h.orchestrator.request_sync(true).await.unwrap();
    assert!(h.accessor.is_populated());

    h.orchestrator.clear_cache().unwrap();

    assert!(!h.accessor.is_populated());
    assert!(h.store.read().unwrap().is_none());
    assert!(!h.store.has_blob("v1-ground.png"));
}

// ============================================================================
// Corrupt-read fallback
// ============================================================================

#[tokio::test]
async fn test_corrupt_snapshot_reads_empty_and_is_treated_as_stale() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileStore::new(dir.path().to_path_buf()).unwrap());
    std::fs::write(store.snapshot_path(), b"{\"schemaVersion\": 1, \"entit").unwrap();

    let h = Harness::new(store, FakeProvider::new(), ConnectivityStatus::Online);
    assert!(!h.accessor.is_populated());
    assert!(h.accessor.entities::<VenueRecord>().is_empty());

    let result = h.orchestrator.request_sync(false).await.unwrap();
    assert!(matches!(result, SyncOutcome::Synced { .. }));
    assert_eq!(h.accessor.count(EntityKind::Venues), 2);
}

// ============================================================================
// Auto-sync
// ============================================================================

#[tokio::test]
async fn test_auto_sync_runs_only_when_coming_back_online() {
    let h = Harness::new(Arc::new(MemoryStore::new()), FakeProvider::new(), ConnectivityStatus::Online);
    let auto = AutoSync::spawn(
        Arc::clone(&h.orchestrator),
        h.network.watch(),
        Duration::from_secs(3600),
    );

    h.network.set_status(ConnectivityStatus::Offline);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.provider.calls(), 0);

    h.network.set_status(ConnectivityStatus::Online);
    wait_until(|| h.accessor.is_populated()).await;
    assert_eq!(h.provider.venue_calls.load(Ordering::SeqCst), 1);

    auto.stop();
    wait_until(|| !auto.is_running()).await;
}

#[tokio::test(start_paused = true)]
async fn test_auto_sync_interval_check() {
    let h = Harness::online(FakeProvider::new());
    let _auto = AutoSync::spawn(
        Arc::clone(&h.orchestrator),
        h.network.watch(),
        Duration::from_secs(60),
    );

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.provider.calls(), 0);

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(h.provider.venue_calls.load(Ordering::SeqCst), 1);

    // Second tick finds the cache fresh
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.provider.venue_calls.load(Ordering::SeqCst), 1);
}

use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::models::{
    CachedSnapshot, Entity, EntityKind, EntityRecord, MapRecord, RouteRecord, VenueRecord,
};
use crate::store::SnapshotStore;

/// Read-only view of the latest committed snapshot.
///
/// Clones share the same underlying cell, so a snapshot committed by the
/// orchestrator is visible to every clone. Each call works on a single
/// `Arc<CachedSnapshot>`, so one result never mixes two sync generations.
#[derive(Clone, Default)]
pub struct CacheAccessor {
    current: Arc<RwLock<Option<Arc<CachedSnapshot>>>>,
}

impl CacheAccessor {
    /// An accessor with nothing cached.
    pub fn new() -> Self {
        Self::default()
    }

    /// An accessor primed from whatever the store last committed.
    pub fn load(store: &dyn SnapshotStore) -> Self {
        let accessor = Self::new();
        accessor.reload(store);
        accessor
    }

    /// Re-read the store. Returns whether a snapshot is now cached.
    pub fn reload(&self, store: &dyn SnapshotStore) -> bool {
        let snapshot = match store.read() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "Failed to load cached snapshot, starting empty");
                None
            }
        };
        let populated = snapshot.is_some();
        *self.write_lock() = snapshot.map(Arc::new);
        debug!(populated, "Cache accessor loaded");
        populated
    }

    pub fn snapshot(&self) -> Option<Arc<CachedSnapshot>> {
        self.current.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn is_populated(&self) -> bool {
        self.snapshot().is_some()
    }

    pub fn last_synced_at(&self) -> Option<DateTime<Utc>> {
        self.snapshot().map(|s| s.last_synced_at)
    }

    /// Human-readable snapshot age, "never" before the first sync.
    pub fn age_display(&self) -> String {
        self.snapshot()
            .map(|s| s.age_display())
            .unwrap_or_else(|| "never".to_string())
    }

    pub fn count(&self, kind: EntityKind) -> usize {
        self.snapshot().map(|s| s.entities.len(kind)).unwrap_or(0)
    }

    pub fn entities<T: Entity>(&self) -> Vec<T> {
        self.snapshot()
            .map(|s| T::select(&s.entities).to_vec())
            .unwrap_or_default()
    }

    pub fn entities_filtered<T, P>(&self, predicate: P) -> Vec<T>
    where
        T: Entity,
        P: Fn(&T) -> bool,
    {
        self.snapshot()
            .map(|s| {
                T::select(&s.entities)
                    .iter()
                    .filter(|e| predicate(e))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Entities of type `T` belonging to one venue.
    pub fn for_venue<T: Entity>(&self, venue_id: &str) -> Vec<T> {
        self.entities_filtered(|e: &T| e.venue_id() == venue_id)
    }

    pub fn find<T: Entity>(&self, id: &str) -> Option<T> {
        self.snapshot()
            .and_then(|s| T::select(&s.entities).iter().find(|e| e.id() == id).cloned())
    }

    /// Records of a kind chosen at run time.
    pub fn records(&self, kind: EntityKind) -> Vec<EntityRecord> {
        self.records_filtered(kind, |_| true)
    }

    pub fn records_filtered<P>(&self, kind: EntityKind, predicate: P) -> Vec<EntityRecord>
    where
        P: Fn(&EntityRecord) -> bool,
    {
        let Some(snapshot) = self.snapshot() else {
            return Vec::new();
        };
        let records = match kind {
            EntityKind::Venues => collect_records::<VenueRecord>(&snapshot),
            EntityKind::Maps => collect_records::<MapRecord>(&snapshot),
            EntityKind::Routes => collect_records::<RouteRecord>(&snapshot),
        };
        records.into_iter().filter(|r| predicate(r)).collect()
    }

    pub(crate) fn publish(&self, snapshot: Arc<CachedSnapshot>) {
        *self.write_lock() = Some(snapshot);
    }

    pub(crate) fn reset(&self) {
        *self.write_lock() = None;
    }

    fn write_lock(&self) -> std::sync::RwLockWriteGuard<'_, Option<Arc<CachedSnapshot>>> {
        self.current.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn collect_records<T: Entity>(snapshot: &CachedSnapshot) -> Vec<EntityRecord> {
    T::select(&snapshot.entities)
        .iter()
        .cloned()
        .map(Entity::into_record)
        .collect()
}

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{Entity, EntityKind, MapRecord, RouteRecord, VenueRecord};
use crate::store::StoreError;

/// Snapshot layout version written by this build.
/// Bump together with a step in `migrate` when the layout changes.
pub const SCHEMA_VERSION: u32 = 1;

/// Every entity group, each a full replacement set from the last sync.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct DomainEntities {
    #[serde(default)]
    pub venues: Vec<VenueRecord>,
    #[serde(default)]
    pub maps: Vec<MapRecord>,
    #[serde(default)]
    pub routes: Vec<RouteRecord>,
}

impl DomainEntities {
    /// Build the groups, keeping the first record for any repeated id.
    pub fn new(venues: Vec<VenueRecord>, maps: Vec<MapRecord>, routes: Vec<RouteRecord>) -> Self {
        Self {
            venues: dedupe_by_id(venues),
            maps: dedupe_by_id(maps),
            routes: dedupe_by_id(routes),
        }
    }

    pub fn len(&self, kind: EntityKind) -> usize {
        match kind {
            EntityKind::Venues => self.venues.len(),
            EntityKind::Maps => self.maps.len(),
            EntityKind::Routes => self.routes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.venues.is_empty() && self.maps.is_empty() && self.routes.is_empty()
    }
}

fn dedupe_by_id<T: Entity>(records: Vec<T>) -> Vec<T> {
    let total = records.len();
    let mut seen: HashSet<String> = HashSet::with_capacity(total);
    let kept: Vec<T> = records
        .into_iter()
        .filter(|r| seen.insert(r.id().to_string()))
        .collect();

    if kept.len() != total {
        warn!(
            kind = %T::KIND,
            dropped = total - kept.len(),
            "Dropped records with duplicate ids"
        );
    }
    kept
}

/// The durable unit of synchronized data.
///
/// A snapshot is only ever written and replaced whole; readers never see
/// groups from two different syncs side by side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct CachedSnapshot {
    pub schema_version: u32,
    pub last_synced_at: DateTime<Utc>,
    pub entities: DomainEntities,
}

impl CachedSnapshot {
    pub fn new(entities: DomainEntities) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            last_synced_at: Utc::now(),
            entities,
        }
    }

    pub fn age(&self) -> Duration {
        Utc::now() - self.last_synced_at
    }

    pub fn age_minutes(&self) -> i64 {
        self.age().num_minutes()
    }

    pub fn age_display(&self) -> String {
        let minutes = self.age_minutes();
        if minutes < 1 {
            // Also covers clock skew
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            let hours = minutes / 60;
            if minutes % 60 >= 30 {
                // Round up: 1h 30m+ becomes 2h
                format!("{}h ago", hours + 1)
            } else {
                format!("{}h ago", hours)
            }
        } else {
            let days = minutes / 1440;
            if (minutes % 1440) / 60 >= 12 {
                // Round up: 1d 12h+ becomes 2d
                format!("{}d ago", days + 1)
            } else {
                format!("{}d ago", days)
            }
        }
    }

    pub fn is_stale(&self, threshold: Duration) -> bool {
        self.age() >= threshold
    }

    /// Blob keys the snapshot's maps point at. Anything else in the store is garbage.
    pub fn tile_keys(&self) -> HashSet<&str> {
        self.entities
            .maps
            .iter()
            .filter_map(|m| m.tile_key.as_deref())
            .collect()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, StoreError> {
        serde_json::to_vec_pretty(self).map_err(|e| StoreError::Corrupt(e.to_string()))
    }

    /// Decode a stored snapshot, migrating older layouts forward.
    ///
    /// Anything unreadable, including a layout newer than this build knows,
    /// comes back as `StoreError::Corrupt`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StoreError> {
        let value: serde_json::Value =
            serde_json::from_slice(bytes).map_err(|e| StoreError::Corrupt(e.to_string()))?;

        let version = value
            .get("schemaVersion")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| StoreError::Corrupt("missing schemaVersion".to_string()))?;

        let version = u32::try_from(version)
            .ok()
            .filter(|v| *v <= SCHEMA_VERSION)
            .ok_or_else(|| {
                StoreError::Corrupt(format!(
                    "unsupported schemaVersion {} (this build reads up to {})",
                    version, SCHEMA_VERSION
                ))
            })?;

        let value = migrate(value, version)?;
        serde_json::from_value(value).map_err(|e| StoreError::Corrupt(e.to_string()))
    }
}

/// Bring a decoded snapshot from `from_version` up to `SCHEMA_VERSION`.
fn migrate(value: serde_json::Value, from_version: u32) -> Result<serde_json::Value, StoreError> {
    match from_version {
        SCHEMA_VERSION => Ok(value),
        v => {
            debug!(from = v, to = SCHEMA_VERSION, "Migrating snapshot layout");
            Err(StoreError::Corrupt(format!("no migration from schemaVersion {}", v)))
        }
    }
}

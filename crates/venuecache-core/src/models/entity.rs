use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{DomainEntities, MapRecord, RouteRecord, VenueRecord};

/// The entity groups that make up a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Venues,
    Maps,
    Routes,
}

impl EntityKind {
    /// All kinds, in fetch/progress order.
    pub const ALL: [EntityKind; 3] = [EntityKind::Venues, EntityKind::Maps, EntityKind::Routes];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Venues => "venues",
            EntityKind::Maps => "maps",
            EntityKind::Routes => "routes",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("Unknown entity kind: {0} (expected venues, maps or routes)")]
pub struct ParseEntityKindError(String);

impl FromStr for EntityKind {
    type Err = ParseEntityKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "venues" | "venue" => Ok(EntityKind::Venues),
            "maps" | "map" => Ok(EntityKind::Maps),
            "routes" | "route" => Ok(EntityKind::Routes),
            _ => Err(ParseEntityKindError(s.to_string())),
        }
    }
}

/// A record type that lives in one of the snapshot's entity groups.
pub trait Entity: Clone + Send + Sync + 'static {
    const KIND: EntityKind;

    fn id(&self) -> &str;

    /// The venue this record belongs to (venues return their own id)
    fn venue_id(&self) -> &str;

    fn select(entities: &DomainEntities) -> &[Self];

    fn into_record(self) -> EntityRecord;
}

impl Entity for VenueRecord {
    const KIND: EntityKind = EntityKind::Venues;

    fn id(&self) -> &str {
        &self.id
    }

    fn venue_id(&self) -> &str {
        &self.id
    }

    fn select(entities: &DomainEntities) -> &[Self] {
        &entities.venues
    }

    fn into_record(self) -> EntityRecord {
        EntityRecord::Venue(self)
    }
}

impl Entity for MapRecord {
    const KIND: EntityKind = EntityKind::Maps;

    fn id(&self) -> &str {
        &self.id
    }

    fn venue_id(&self) -> &str {
        &self.venue_id
    }

    fn select(entities: &DomainEntities) -> &[Self] {
        &entities.maps
    }

    fn into_record(self) -> EntityRecord {
        EntityRecord::Map(self)
    }
}

impl Entity for RouteRecord {
    const KIND: EntityKind = EntityKind::Routes;

    fn id(&self) -> &str {
        &self.id
    }

    fn venue_id(&self) -> &str {
        &self.venue_id
    }

    fn select(entities: &DomainEntities) -> &[Self] {
        &entities.routes
    }

    fn into_record(self) -> EntityRecord {
        EntityRecord::Route(self)
    }
}

/// One record of any kind, for callers that choose the kind at run time.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EntityRecord {
    Venue(VenueRecord),
    Map(MapRecord),
    Route(RouteRecord),
}

impl EntityRecord {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityRecord::Venue(_) => EntityKind::Venues,
            EntityRecord::Map(_) => EntityKind::Maps,
            EntityRecord::Route(_) => EntityKind::Routes,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            EntityRecord::Venue(v) => v.id(),
            EntityRecord::Map(m) => m.id(),
            EntityRecord::Route(r) => r.id(),
        }
    }

    pub fn venue_id(&self) -> &str {
        match self {
            EntityRecord::Venue(v) => Entity::venue_id(v),
            EntityRecord::Map(m) => Entity::venue_id(m),
            EntityRecord::Route(r) => Entity::venue_id(r),
        }
    }
}

//! Domain models for cached venue data.
//!
//! This module contains the records synchronized from the remote provider:
//!
//! - `VenueRecord`: Shopping centres and other venues
//! - `MapRecord`: Per-floor maps, optionally backed by a tile blob
//! - `RouteRecord`, `Waypoint`: Pre-computed indoor routes
//! - `EntityKind`, `Entity`, `EntityRecord`: Kind-level plumbing shared by the cache
//! - `CachedSnapshot`, `DomainEntities`: The versioned unit of persistence

pub mod entity;
pub mod map;
pub mod route;
pub mod snapshot;
pub mod venue;

pub use entity::{Entity, EntityKind, EntityRecord, ParseEntityKindError};
pub use map::MapRecord;
pub use route::{RouteRecord, Waypoint};
pub use snapshot::{CachedSnapshot, DomainEntities, SCHEMA_VERSION};
pub use venue::VenueRecord;

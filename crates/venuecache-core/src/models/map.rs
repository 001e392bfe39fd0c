use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single floor map of a venue.
///
/// `tile_key` names a blob in the persistent store holding the rendered
/// floor image; the sync prefetches it so the map works offline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct MapRecord {
    pub id: String,
    pub venue_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub floor: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tile_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl MapRecord {
    pub fn display_floor(&self) -> String {
        match self.floor {
            0 => "Ground floor".to_string(),
            n if n > 0 => format!("Level {}", n),
            n => format!("Basement {}", -n),
        }
    }
}

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct Waypoint {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub floor: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instruction: Option<String>,
}

/// A pre-computed walking route inside a venue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct RouteRecord {
    pub id: String,
    pub venue_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map_id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub origin: String,
    #[serde(default)]
    pub destination: String,
    #[serde(default)]
    pub waypoints: Vec<Waypoint>,
    #[serde(default)]
    pub distance_meters: f64,
    #[serde(default)]
    pub estimated_minutes: u32,
}

impl RouteRecord {
    pub fn display_duration(&self) -> String {
        match self.estimated_minutes {
            0 => "< 1 min".to_string(),
            m if m < 60 => format!("{} min", m),
            m => format!("{}h {}m", m / 60, m % 60),
        }
    }

    /// Whether the route changes floor at any point
    pub fn crosses_floors(&self) -> bool {
        self.waypoints
            .windows(2)
            .any(|pair| pair[0].floor != pair[1].floor)
    }
}

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct VenueRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub province: String,
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opening_hours: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_count: Option<u32>,
}

impl VenueRecord {
    /// "City, Province", dropping whichever half is missing
    pub fn display_location(&self) -> String {
        match (self.city.is_empty(), self.province.is_empty()) {
            (false, false) => format!("{}, {}", self.city, self.province),
            (false, true) => self.city.clone(),
            (true, false) => self.province.clone(),
            (true, true) => "Unknown".to_string(),
        }
    }

    pub fn display_store_count(&self) -> String {
        match self.store_count {
            Some(1) => "1 store".to_string(),
            Some(count) => format!("{} stores", count),
            None => "Unknown".to_string(),
        }
    }
}

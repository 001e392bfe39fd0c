//! Application configuration management.
//!
//! Configuration is stored at `~/.config/venuecache/config.json`. Every
//! field is optional in the file; missing fields take their defaults.
//! `VENUECACHE_API_URL` and `VENUECACHE_API_TOKEN` override the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::network::monitor::DEFAULT_POLL_INTERVAL_SECS;
use crate::network::probe::DEFAULT_PROBE_ADDRESS;
use crate::sync::{
    SyncConfig, DEFAULT_AUTO_SYNC_INTERVAL_SECS, DEFAULT_SESSION_TIMEOUT_SECS, DEFAULT_STALENESS_DAYS,
};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "venuecache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const DEFAULT_REMOTE_BASE_URL: &str = "http://localhost:8080/api";

pub const ENV_API_URL: &str = "VENUECACHE_API_URL";
pub const ENV_API_TOKEN: &str = "VENUECACHE_API_TOKEN";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub remote_base_url: String,
    /// Never written to disk; set from the environment.
    #[serde(skip)]
    pub api_token: Option<String>,
    pub staleness_threshold_days: i64,
    pub poll_interval_secs: u64,
    pub session_timeout_secs: u64,
    pub auto_sync_interval_secs: u64,
    pub max_cache_bytes: Option<u64>,
    pub probe_address: String,
    /// Namespaces the cache directory, one cache per tenant.
    pub tenant: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            remote_base_url: DEFAULT_REMOTE_BASE_URL.to_string(),
            api_token: None,
            staleness_threshold_days: DEFAULT_STALENESS_DAYS,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            session_timeout_secs: DEFAULT_SESSION_TIMEOUT_SECS,
            auto_sync_interval_secs: DEFAULT_AUTO_SYNC_INTERVAL_SECS,
            max_cache_bytes: None,
            probe_address: DEFAULT_PROBE_ADDRESS.to_string(),
            tenant: None,
        }
    }
}

impl CacheConfig {
    /// Load from the default location with environment overrides applied.
    pub fn load() -> Result<Self> {
        let config = Self::load_from(&Self::config_path()?)?;
        Ok(config.with_env_overrides(|key| std::env::var(key).ok()))
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&contents).with_context(|| format!("Invalid config in {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(self.cache_dir_in(&cache_dir))
    }

    fn cache_dir_in(&self, base: &Path) -> PathBuf {
        let mut path = base.join(APP_NAME);
        if let Some(ref tenant) = self.tenant {
            path = path.join(tenant);
        }
        path
    }

    /// Apply overrides from `lookup`, usually `std::env::var`.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_API_URL).filter(|v| !v.trim().is_empty()) {
            self.remote_base_url = url;
        }
        if let Some(token) = lookup(ENV_API_TOKEN).filter(|v| !v.trim().is_empty()) {
            self.api_token = Some(token);
        }
        self
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            staleness_threshold: chrono::Duration::days(self.staleness_threshold_days.max(0)),
            session_timeout: Duration::from_secs(self.session_timeout_secs.max(1)),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn auto_sync_interval(&self) -> Duration {
        Duration::from_secs(self.auto_sync_interval_secs.max(1))
    }
}

//! Configuration for the offline core.
//!
//! Every field has a default, so `{}` is a valid configuration: it talks to
//! `http://localhost:1337` and, having no data directory, runs network-only.
//!
//! ```
//! use restaurant_offline_core::config::CoreConfig;
//!
//! let config = CoreConfig::from_json(r#"{
//!     "base_url": "http://localhost:1337",
//!     "data_dir": "/tmp/restaurants",
//!     "response_cache": { "strategy": "cache_first" }
//! }"#).unwrap();
//! assert!(config.start_online);
//! assert_eq!(config.response_cache.name, "restaurant-app-v1");
//! ```

use std::path::PathBuf;

use serde::Deserialize;

use crate::app_error::{CoreError, CoreResult};
use crate::local_db_state::DEFAULT_MAP_SIZE;
use crate::response_cache::CacheStrategy;

#[derive(Debug, Clone, Deserialize)]
pub struct CoreConfig {
    /// REST backend root; collections live at `<base_url>/<collection>`.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Where the LMDB environments go. `None` disables persistence.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    #[serde(default = "default_map_size")]
    pub map_size_bytes: usize,

    /// Connectivity reported by the platform at startup.
    #[serde(default = "default_true")]
    pub start_online: bool,

    #[serde(default)]
    pub response_cache: ResponseCacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseCacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Versioned cache name; changing it starts from an empty cache.
    #[serde(default = "default_cache_name")]
    pub name: String,

    #[serde(default)]
    pub strategy: CacheStrategy,

    /// URLs fetched into the cache at startup.
    #[serde(default)]
    pub precache: Vec<String>,
}

fn default_base_url() -> String {
    "http://localhost:1337".to_string()
}

fn default_map_size() -> usize {
    DEFAULT_MAP_SIZE
}

fn default_true() -> bool {
    true
}

fn default_cache_name() -> String {
    "restaurant-app-v1".to_string()
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            data_dir: None,
            map_size_bytes: default_map_size(),
            start_online: true,
            response_cache: ResponseCacheConfig::default(),
        }
    }
}

impl Default for ResponseCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            name: default_cache_name(),
            strategy: CacheStrategy::default(),
            precache: Vec::new(),
        }
    }
}

impl CoreConfig {
    pub fn from_json(json: &str) -> CoreResult<Self> {
        let config: CoreConfig =
            serde_json::from_str(json).map_err(|e| CoreError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CoreResult<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(CoreError::Config(format!(
                "base_url must be an http(s) URL, got {:?}",
                self.base_url
            )));
        }
        if self.map_size_bytes == 0 {
            return Err(CoreError::Config("map_size_bytes must be positive".to_string()));
        }
        if self.response_cache.name.trim().is_empty() {
            return Err(CoreError::Config("response_cache.name must not be empty".to_string()));
        }
        Ok(())
    }
}

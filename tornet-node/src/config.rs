//! Node configuration
//!
//! Loaded from a TOML file with per-field defaults, then overridden by
//! environment variables and CLI flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use tornet_core::error::{Result, TornetError};

/// Complete node configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NodeConfig {
    /// Node identity configuration
    #[serde(default)]
    pub node: NodeSettings,

    /// Storage configuration
    #[serde(default)]
    pub storage: StorageSettings,

    /// Publish loop configuration
    #[serde(default)]
    pub publish: PublishSettings,
}

impl NodeConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: NodeConfig = toml::from_str(&content)
            .map_err(|e| TornetError::InvalidInput(format!("bad config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with fallback to defaults
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::from_file(path.as_ref()) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %e, path = ?path.as_ref(), "failed to load config, using defaults");
                Self::default()
            }
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if !self.node.data_dir.exists() {
            std::fs::create_dir_all(&self.node.data_dir).map_err(|e| {
                TornetError::InvalidInput(format!(
                    "cannot create data directory {:?}: {}",
                    self.node.data_dir, e
                ))
            })?;
        }
        if self.publish.recheck_secs == 0 {
            return Err(TornetError::InvalidInput(
                "publish recheck interval cannot be 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Override config with CLI arguments
    pub fn with_overrides(mut self, data_dir: Option<PathBuf>) -> Self {
        if let Some(dir) = data_dir {
            self.node.data_dir = dir;
        }
        self
    }

    /// Apply environment variable overrides
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(dir) = std::env::var("TORNET_DATA_DIR") {
            self.node.data_dir = PathBuf::from(dir);
        }
        if let Ok(capacity) = std::env::var("TORNET_CACHE_CAPACITY_MB") {
            if let Ok(mb) = capacity.parse::<u64>() {
                self.storage.cache_capacity_mb = mb;
            }
        }
        self
    }
}

/// Node identity configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSettings {
    /// Directory holding the local, cache, and publish databases
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Seed for a deterministic node id; a random id is generated when unset
    #[serde(default)]
    pub id_seed: Option<String>,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            id_seed: None,
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./tornet_data")
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Cache store byte budget in MB; the local store is unbounded
    #[serde(default = "default_cache_capacity_mb")]
    pub cache_capacity_mb: u64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            cache_capacity_mb: default_cache_capacity_mb(),
        }
    }
}

impl StorageSettings {
    pub fn cache_capacity_bytes(&self) -> u64 {
        self.cache_capacity_mb * 1024 * 1024
    }
}

fn default_cache_capacity_mb() -> u64 {
    1024
}

/// Publish loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishSettings {
    /// Delay before rechecking a fully replicated chunk, in seconds
    #[serde(default = "default_recheck_secs")]
    pub recheck_secs: u64,

    /// Sleep when the publish store is empty, in milliseconds
    #[serde(default = "default_idle_sleep_ms")]
    pub idle_sleep_ms: u64,

    /// Retries per chunk per cycle when a remote store times out
    #[serde(default = "default_store_retries")]
    pub store_retries: u32,

    /// Base backoff between store retries, in milliseconds (doubles per try)
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Cool-down for peers that served corrupt data, in seconds
    #[serde(default = "default_blacklist_cooldown_secs")]
    pub blacklist_cooldown_secs: u64,

    /// Lookup parallelism for chunk searches
    #[serde(default = "default_search_parallelism")]
    pub search_parallelism: usize,
}

impl Default for PublishSettings {
    fn default() -> Self {
        Self {
            recheck_secs: default_recheck_secs(),
            idle_sleep_ms: default_idle_sleep_ms(),
            store_retries: default_store_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            blacklist_cooldown_secs: default_blacklist_cooldown_secs(),
            search_parallelism: default_search_parallelism(),
        }
    }
}

impl PublishSettings {
    pub fn recheck_interval(&self) -> Duration {
        Duration::from_secs(self.recheck_secs)
    }

    pub fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_sleep_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn blacklist_cooldown(&self) -> Duration {
        Duration::from_secs(self.blacklist_cooldown_secs)
    }
}

fn default_recheck_secs() -> u64 {
    60
}

fn default_idle_sleep_ms() -> u64 {
    1000
}

fn default_store_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_blacklist_cooldown_secs() -> u64 {
    600
}

fn default_search_parallelism() -> usize {
    1
}

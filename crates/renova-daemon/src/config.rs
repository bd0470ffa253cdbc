//! Configuration file management.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use renova_types::{
    DEFAULT_LOCK_SWEEP_INTERVAL_SECS, DEFAULT_LOCK_TTL_MS, DEFAULT_POLL_INTERVAL_MS,
    DEFAULT_REORG_DEPTH,
};

/// Complete daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Chain RPC settings.
    #[serde(default)]
    pub chain: ChainConfig,
    /// Store settings.
    #[serde(default)]
    pub store: StoreConfig,
    /// Renewal lock settings.
    #[serde(default)]
    pub locks: LocksConfig,
    /// Advanced settings.
    #[serde(default)]
    pub advanced: AdvancedConfig,
}

/// Chain RPC configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// JSON-RPC endpoint URL. Required.
    #[serde(default)]
    pub rpc_url: String,
    /// Renewal contract address to filter events on. Required.
    #[serde(default)]
    pub contract_address: String,
    /// Interval between reconciliation iterations, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Rollback depth below a regressed chain head.
    #[serde(default = "default_reorg_depth")]
    pub reorg_depth: u64,
    /// Per-request RPC timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

/// Store configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Data directory. Empty = platform default.
    #[serde(default)]
    pub data_dir: String,
}

/// Renewal lock configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocksConfig {
    /// Default lock TTL handed to the renewal workflow, in milliseconds.
    #[serde(default = "default_lock_ttl_ms")]
    pub default_ttl_ms: u64,
    /// Interval of the expired-lock sweep, in seconds.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

/// Advanced configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvancedConfig {
    /// Log level: "debug" | "info" | "warn" | "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// Default value functions

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_reorg_depth() -> u64 {
    DEFAULT_REORG_DEPTH
}

fn default_request_timeout() -> u64 {
    30
}

fn default_lock_ttl_ms() -> u64 {
    DEFAULT_LOCK_TTL_MS
}

fn default_sweep_interval() -> u64 {
    DEFAULT_LOCK_SWEEP_INTERVAL_SECS
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_url: String::new(),
            contract_address: String::new(),
            poll_interval_ms: default_poll_interval_ms(),
            reorg_depth: default_reorg_depth(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for LocksConfig {
    fn default() -> Self {
        Self {
            default_ttl_ms: default_lock_ttl_ms(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl Default for AdvancedConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from the default config file location.
    ///
    /// Falls back to defaults if file does not exist.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();
        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: DaemonConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Get the data directory path.
    pub fn data_dir(&self) -> PathBuf {
        if self.store.data_dir.is_empty() {
            Self::default_data_dir()
        } else {
            PathBuf::from(&self.store.data_dir)
        }
    }

    /// Get the config file path.
    fn config_path() -> PathBuf {
        if let Ok(dir) = std::env::var("RENOVA_DATA_DIR") {
            return PathBuf::from(dir).join("config.toml");
        }
        Self::default_data_dir().join("config.toml")
    }

    /// Platform-specific default data directory.
    fn default_data_dir() -> PathBuf {
        if let Ok(dir) = std::env::var("RENOVA_DATA_DIR") {
            return PathBuf::from(dir);
        }
        #[cfg(target_os = "macos")]
        {
            dirs_fallback("Library/Application Support/Renova")
        }
        #[cfg(not(target_os = "macos"))]
        {
            dirs_fallback(".renova")
        }
    }
}

/// Fallback home directory resolution.
fn dirs_fallback(subpath: &str) -> PathBuf {
    std::env::var("HOME")
        .map(|h| PathBuf::from(h).join(subpath))
        .unwrap_or_else(|_| PathBuf::from("/tmp/renova"))
}

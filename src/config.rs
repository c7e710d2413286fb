//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. `$MAILINDEX_CONFIG` (environment variable)
//! 2. `~/.config/mailindex/config.toml` (Linux/macOS)
//!    `%APPDATA%\mailindex\config.toml` (Windows)
//! 3. Built-in defaults
//!
//! CLI flags (and their `MAILINDEX_*` env fallbacks) override file values.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Mail store and index locations.
    pub store: StoreConfig,
    /// Indexing behavior and limits.
    pub indexing: IndexingConfig,
    /// Filesystem watcher tuning.
    pub watch: WatchConfig,
    /// Search defaults.
    pub search: SearchConfig,
    /// General behavior settings.
    pub general: GeneralConfig,
}

/// Mail store and index locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Root of the on-disk mail store (account/mailbox tree of .emlx files).
    pub mail_root: Option<PathBuf>,
    /// Location of the SQLite index file. Defaults to the data dir.
    pub db_path: Option<PathBuf>,
}

/// Indexing behavior and limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingConfig {
    /// Maximum message file size in bytes; larger files are skipped entirely.
    pub max_message_size: u64,
    /// Maximum indexed plain-text body size per message, in bytes.
    pub max_body_size: usize,
    /// Hours after which the index is considered stale.
    pub staleness_hours: f64,
}

/// Filesystem watcher tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Quiet window in milliseconds before a burst of events triggers a sync.
    pub debounce_ms: u64,
}

/// Search defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Default number of results when the caller does not specify a limit.
    pub default_limit: usize,
}

/// General behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Override cache directory for logs.
    pub cache_dir: Option<PathBuf>,
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
}

// ── Default implementations ─────────────────────────────────────

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            mail_root: None,
            db_path: None,
        }
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            max_message_size: 25 * 1024 * 1024, // 25 MB
            max_body_size: 512 * 1024,          // 512 KiB of reduced text
            staleness_hours: 24.0,
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self { debounce_ms: 1000 }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self { default_limit: 50 }
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            log_level: "warn".to_string(),
        }
    }
}

// ── Load / save ─────────────────────────────────────────────────

/// Load configuration, searching standard locations.
///
/// Returns the default configuration if no file is found or on parse error.
pub fn load_config() -> Config {
    if let Some(path) = config_file_path() {
        if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(contents) => match toml::from_str::<Config>(&contents) {
                    Ok(cfg) => {
                        tracing::info!(path = %path.display(), "Loaded config");
                        return cfg;
                    }
                    Err(e) => {
                        tracing::warn!(
                            path = %path.display(),
                            error = %e,
                            "Failed to parse config, using defaults"
                        );
                    }
                },
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to read config file, using defaults"
                    );
                }
            }
        }
    }
    Config::default()
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    // 1. Environment variable override
    if let Ok(env_path) = std::env::var("MAILINDEX_CONFIG") {
        return Some(PathBuf::from(env_path));
    }

    // 2. Standard config directory
    dirs::config_dir().map(|d| d.join("mailindex").join("config.toml"))
}

/// Return the cache directory for logs.
pub fn cache_dir(config: &Config) -> PathBuf {
    if let Some(ref dir) = config.general.cache_dir {
        return dir.clone();
    }
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mailindex")
}

/// Resolve the index database path: explicit, config, or the data dir.
pub fn db_path(config: &Config) -> PathBuf {
    if let Some(ref path) = config.store.db_path {
        return path.clone();
    }
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mailindex")
        .join("index.db")
}

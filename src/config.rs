//! Configuration for the notification pipeline.
//!
//! Layered configuration:
//! - Default values
//! - TOML configuration file (`.watchcast/settings.toml`)
//! - Environment variable overrides
//!
//! # Environment Variables
//!
//! Environment variables are prefixed with `WC_` and use double
//! underscores to separate nested levels:
//! - `WC_WATCH__DEBOUNCE_MS=250` sets `watch.debounce_ms`
//! - `WC_PIPELINE__FLUSH_INTERVAL_MS=2000` sets `pipeline.flush_interval_ms`
//! - `WC_WATCH__RECURSIVE=false` sets `watch.recursive`

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Per-watch defaults
    #[serde(default)]
    pub watch: WatchConfig,

    /// Flush loop and fan-out settings
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WatchConfig {
    /// Minimum time between two forwarded events for the same path
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Files larger than this are treated as ignored
    #[serde(default = "default_max_file_size_bytes")]
    pub max_file_size_bytes: u64,

    /// Watch subtrees recursively unless a request says otherwise
    #[serde(default = "default_true")]
    pub recursive: bool,

    /// Gitignore-style patterns applied to every watch
    #[serde(default = "default_ignore_patterns")]
    pub ignore_patterns: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PipelineConfig {
    /// Periodic flush tick
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// Same-path events inside this span coalesce into one record
    #[serde(default = "default_aggregation_window_ms")]
    pub aggregation_window_ms: u64,

    /// Distinct pending paths that force an early flush
    #[serde(default = "default_max_pending_paths")]
    pub max_pending_paths: usize,

    /// Upper bound on one subscriber send
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,

    /// Bound of the raw-event and record channels
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

/// Logging configuration with per-module level overrides.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Default log level: error, warn, info, debug, trace
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-module overrides, e.g. `watch = "debug"`
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_debounce_ms() -> u64 {
    500
}
fn default_max_file_size_bytes() -> u64 {
    100 * 1024 * 1024
}
fn default_true() -> bool {
    true
}
fn default_flush_interval_ms() -> u64 {
    1000
}
fn default_aggregation_window_ms() -> u64 {
    1000
}
fn default_max_pending_paths() -> usize {
    100
}
fn default_send_timeout_ms() -> u64 {
    2000
}
fn default_channel_capacity() -> usize {
    100
}
fn default_log_level() -> String {
    "warn".to_string()
}

fn default_ignore_patterns() -> Vec<String> {
    [
        "*.tmp",
        "*.temp",
        "*.log",
        "*.swp",
        "*.swo",
        "*~",
        ".DS_Store",
        "Thumbs.db",
        "node_modules/",
        ".git/",
        ".svn/",
        ".hg/",
        "__pycache__/",
        "*.pyc",
        "*.pyo",
        ".pytest_cache/",
        ".coverage",
        "*.egg-info/",
        "dist/",
        "build/",
        ".vscode/",
        ".idea/",
        "*.lock",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            watch: WatchConfig::default(),
            pipeline: PipelineConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            max_file_size_bytes: default_max_file_size_bytes(),
            recursive: default_true(),
            ignore_patterns: default_ignore_patterns(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: default_flush_interval_ms(),
            aggregation_window_ms: default_aggregation_window_ms(),
            max_pending_paths: default_max_pending_paths(),
            send_timeout_ms: default_send_timeout_ms(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl WatchConfig {
    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl PipelineConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn aggregation_window(&self) -> Duration {
        Duration::from_millis(self.aggregation_window_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(".watchcast/settings.toml"));

        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(config_path))
            // WC_WATCH__DEBOUNCE_MS -> watch.debounce_ms
            .merge(Env::prefixed("WC_").map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
            .extract()
            .map_err(Box::new)
    }

    /// Load configuration from a specific file
    pub fn load_from(path: impl AsRef<std::path::Path>) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("WC_").map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
            .extract()
            .map_err(Box::new)
    }

    /// Find the workspace config by looking for a .watchcast directory,
    /// searching from the current directory up to the filesystem root
    fn find_workspace_config() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;
        for ancestor in current.ancestors() {
            let config_dir = ancestor.join(".watchcast");
            if config_dir.is_dir() {
                return Some(config_dir.join("settings.toml"));
            }
        }
        None
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<std::path::Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;
        Ok(())
    }

    /// Create a default settings file at `.watchcast/settings.toml`
    pub fn init_config_file(force: bool) -> anyhow::Result<PathBuf> {
        let config_path = PathBuf::from(".watchcast/settings.toml");

        if !force && config_path.exists() {
            anyhow::bail!("Configuration file already exists. Use --force to overwrite");
        }

        let settings = Settings::default();
        settings.save(&config_path)?;
        Ok(config_path)
    }
}

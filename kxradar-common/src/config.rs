//! Bootstrap configuration and store folder resolution
//!
//! The TOML file only covers what is needed before the settings store is
//! open: where the store lives, logging, and stream buffer sizes. Radar
//! settings themselves live in the store.
//!
//! Store folder priority:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. OS-dependent default (fallback)

use crate::stream::DEFAULT_STREAM_CAPACITY;
use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable naming the store folder
pub const STORE_DIR_ENV: &str = "KXRADAR_STORE_DIR";

/// Application folder name under the OS config/data directories
const APP_DIR_NAME: &str = "kxradar";

/// Bootstrap configuration loaded from TOML
///
/// Read once at startup; a restart is needed to pick up changes.
#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    /// Settings store folder (optional)
    #[serde(default)]
    pub store_dir: Option<PathBuf>,

    /// Buffer size for each host subscription
    #[serde(default = "default_stream_capacity")]
    pub stream_capacity: usize,

    /// Buffer size for the alert event bus
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            store_dir: None,
            stream_capacity: default_stream_capacity(),
            event_capacity: default_event_capacity(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    /// Log filter directive (trace, debug, info, warn, error, or a full
    /// `EnvFilter` string); the binary's built-in filter applies when unset
    #[serde(default)]
    pub level: Option<String>,
}

fn default_stream_capacity() -> usize {
    DEFAULT_STREAM_CAPACITY
}

fn default_event_capacity() -> usize {
    64
}

impl TomlConfig {
    /// Reject values the runtime cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.stream_capacity == 0 {
            return Err(Error::Config("stream_capacity must be at least 1".to_string()));
        }
        if self.event_capacity == 0 {
            return Err(Error::Config("event_capacity must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Load and validate a TOML bootstrap file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))?;
    config.validate()?;
    debug!("Loaded bootstrap config from {}", path.display());
    Ok(config)
}

/// Load the bootstrap config from an explicit path, or from the default
/// location when it exists, or fall back to built-in defaults
pub fn load_or_default(path: Option<&Path>) -> Result<TomlConfig> {
    match path {
        Some(path) => load_toml_config(path),
        None => match default_config_path().filter(|p| p.exists()) {
            Some(path) => load_toml_config(&path),
            None => Ok(TomlConfig::default()),
        },
    }
}

/// Resolve the store folder following the priority order above
pub fn resolve_store_dir(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    toml_config: Option<&TomlConfig>,
) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = toml_config.and_then(|c| c.store_dir.as_ref()) {
        return path.clone();
    }

    default_store_dir()
}

/// Platform config file location (`<config dir>/kxradar/config.toml`)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR_NAME).join("config.toml"))
}

/// OS-dependent default store folder
pub fn default_store_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join(APP_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from("./kxradar_data"))
}

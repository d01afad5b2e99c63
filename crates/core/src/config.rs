//! Configuration management
//!
//! Loads, saves and migrates the stowage configuration file. The file is
//! TOML, stored at `$STOW_CONFIG_DIR/config.toml` when that variable is set
//! and at `<config dir>/stowage/config.toml` otherwise.
//!
//! Changes to `SCHEMA_VERSION` require migration support.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::alias::Alias;
use crate::error::{Error, Result};
use crate::transfer::TransferConfig;

/// Current configuration schema version
pub const SCHEMA_VERSION: u32 = 1;

/// Environment variable overriding the configuration directory
pub const CONFIG_DIR_ENV: &str = "STOW_CONFIG_DIR";

/// Default output format
const DEFAULT_OUTPUT: &str = "human";

/// Default color setting
const DEFAULT_COLOR: &str = "auto";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Schema version for migration support
    pub schema_version: u32,

    /// Default settings
    #[serde(default)]
    pub defaults: Defaults,

    /// Transfer engine tuning
    #[serde(default)]
    pub transfer: TransferSettings,

    /// Configured aliases
    #[serde(default)]
    pub aliases: Vec<Alias>,
}

/// Default settings for CLI behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Defaults {
    /// Output format: "human" or "json"
    #[serde(default = "default_output")]
    pub output: String,

    /// Color mode: "auto", "always", or "never"
    #[serde(default = "default_color")]
    pub color: String,

    /// Show progress bars
    #[serde(default = "default_true")]
    pub progress: bool,
}

/// Transfer settings as written in the `[transfer]` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSettings {
    /// Payloads at or above this size use multipart upload and ranged download
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold: u64,

    /// Multipart part size and download range size
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Number of tasks allowed to transfer at the same time
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,
}

fn default_output() -> String {
    DEFAULT_OUTPUT.to_string()
}

fn default_color() -> String {
    DEFAULT_COLOR.to_string()
}

fn default_true() -> bool {
    true
}

fn default_multipart_threshold() -> u64 {
    TransferConfig::default().multipart_threshold
}

fn default_chunk_size() -> u64 {
    TransferConfig::default().chunk_size
}

fn default_max_concurrent_tasks() -> usize {
    TransferConfig::default().max_concurrent_tasks
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            progress: true,
        }
    }
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            multipart_threshold: default_multipart_threshold(),
            chunk_size: default_chunk_size(),
            max_concurrent_tasks: default_max_concurrent_tasks(),
        }
    }
}

impl TransferSettings {
    /// Convert into the engine configuration, validating the values
    pub fn to_transfer_config(&self) -> Result<TransferConfig> {
        let config = TransferConfig {
            multipart_threshold: self.multipart_threshold,
            chunk_size: self.chunk_size,
            max_concurrent_tasks: self.max_concurrent_tasks.max(1),
        };
        config.validate()?;
        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            defaults: Defaults::default(),
            transfer: TransferSettings::default(),
            aliases: Vec::new(),
        }
    }
}

/// Resolve the directory holding stowage's configuration files
pub fn config_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV) {
        return Ok(PathBuf::from(dir));
    }
    let base = dirs::config_dir()
        .ok_or_else(|| Error::Config("Could not determine config directory".into()))?;
    Ok(base.join("stowage"))
}

/// Write a file readable only by its owner
pub(crate) fn write_private(path: &std::path::Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    std::fs::write(path, content)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let permissions = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(path, permissions)?;
    }

    Ok(())
}

/// Configuration manager handles loading and saving config
#[derive(Debug)]
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new ConfigManager with the default config path
    pub fn new() -> Result<Self> {
        Ok(Self {
            config_path: config_dir()?.join("config.toml"),
        })
    }

    /// Create a ConfigManager with a custom path (useful for testing)
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the configuration file path
    pub fn config_path(&self) -> &PathBuf {
        &self.config_path
    }

    /// Load configuration from disk
    ///
    /// If the configuration file doesn't exist, returns a default configuration.
    /// If the schema version doesn't match, attempts migration.
    pub fn load(&self) -> Result<Config> {
        if !self.config_path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(&self.config_path)?;
        let mut config: Config = toml::from_str(&content)?;

        if config.schema_version < SCHEMA_VERSION {
            config = self.migrate(config)?;
        } else if config.schema_version > SCHEMA_VERSION {
            return Err(Error::Config(format!(
                "Configuration file version {} is newer than supported version {}. Please upgrade stow.",
                config.schema_version, SCHEMA_VERSION
            )));
        }

        Ok(config)
    }

    /// Save configuration to disk with owner-only permissions
    pub fn save(&self, config: &Config) -> Result<()> {
        let content = toml::to_string_pretty(config)?;
        write_private(&self.config_path, &content)
    }

    /// Migrate configuration from older schema version
    fn migrate(&self, config: Config) -> Result<Config> {
        let mut config = config;
        tracing::info!(
            from = config.schema_version,
            to = SCHEMA_VERSION,
            "migrating configuration"
        );
        config.schema_version = SCHEMA_VERSION;
        Ok(config)
    }
}

//! Engine configuration.
//!
//! Layered like the rest of the tooling: built-in defaults, then an optional
//! TOML file, then `STREAMLEDGER__SECTION__KEY` environment variables.

use anyhow::{Context, Result, anyhow};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::lifecycle::{DEFAULT_MAX_STAGE, DEFAULT_STALE_AFTER_SECS, LifecyclePolicy};
use crate::storage::StoreConfig;

pub const APP_NAME: &str = "streamledger";

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "STREAMLEDGER";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub logging: LoggingConfig,
    pub stream: StreamConfig,
    pub assets: AssetsConfig,
    pub lifecycle: LifecycleConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Conversation stream endpoint.
    pub endpoint: String,
    /// Base of document feeds; the document id is appended as a path segment.
    pub document_endpoint: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:5000/search".to_string(),
            document_endpoint: "http://localhost:5000/api/todos/content".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetsConfig {
    /// Base URL assets are downloaded from. Empty disables asset fetching.
    pub endpoint: String,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:5000/api/todos/content/image".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    pub stale_after_secs: u64,
    pub max_stage: u32,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: DEFAULT_STALE_AFTER_SECS,
            max_stage: DEFAULT_MAX_STAGE,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory of the durable store. Unset keeps sessions in memory.
    pub dir: Option<PathBuf>,
}

impl EngineConfig {
    /// Load from `path` (missing file allowed) plus environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let defaults = EngineConfig::default();
        let built = Config::builder()
            .set_default("logging.level", defaults.logging.level)?
            .set_default("stream.endpoint", defaults.stream.endpoint)?
            .set_default("stream.document_endpoint", defaults.stream.document_endpoint)?
            .set_default("assets.endpoint", defaults.assets.endpoint)?
            .set_default(
                "lifecycle.stale_after_secs",
                defaults.lifecycle.stale_after_secs as i64,
            )?
            .set_default("lifecycle.max_stage", defaults.lifecycle.max_stage as i64)?
            .add_source(File::from(path).format(FileFormat::Toml).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .with_context(|| format!("loading config from {}", path.display()))?;

        built
            .try_deserialize()
            .with_context(|| format!("parsing config from {}", path.display()))
    }

    /// Write the default configuration to `path`, creating parent directories.
    pub fn write_default(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating config directory {parent:?}"))?;
        }
        let toml =
            toml::to_string_pretty(&Self::default()).context("serializing default config to TOML")?;
        let body = format!(
            "# Configuration for {APP_NAME}\n# File: {}\n\n{toml}",
            path.display()
        );
        fs::write(path, body).with_context(|| format!("writing config file to {}", path.display()))
    }

    pub fn lifecycle_policy(&self) -> LifecyclePolicy {
        LifecyclePolicy {
            stale_after: chrono::Duration::seconds(
                i64::try_from(self.lifecycle.stale_after_secs).unwrap_or(i64::MAX / 1000),
            ),
            max_stage: self.lifecycle.max_stage,
        }
    }

    pub fn store_config(&self) -> StoreConfig {
        match &self.storage.dir {
            Some(dir) => StoreConfig::Local(dir.clone()),
            None => StoreConfig::Memory,
        }
    }

    /// Asset endpoint, when asset fetching is enabled.
    pub fn asset_endpoint(&self) -> Option<&str> {
        let endpoint = self.assets.endpoint.trim();
        (!endpoint.is_empty()).then_some(endpoint)
    }
}

/// `$XDG_CONFIG_HOME/streamledger/config.toml`, or the platform equivalent.
pub fn default_config_path() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir).join(APP_NAME).join("config.toml"));
    }
    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
        .map(|dir| dir.join(APP_NAME).join("config.toml"))
        .ok_or_else(|| anyhow!("unable to determine configuration directory"))
}

/// Default directory of the durable store.
pub fn default_data_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os("XDG_DATA_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir).join(APP_NAME));
    }
    dirs::data_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".local").join("share")))
        .map(|dir| dir.join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine data directory"))
}

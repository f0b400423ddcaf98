//! # Configuration
//!
//! One TOML file holds every setting. Missing files are replaced by a freshly
//! written default so a first start works without any setup; missing keys
//! fall back to their defaults through `#[serde(default)]`.
//!
//! Lookup order:
//! 1. `$OXYTANK_CONFIG`
//! 2. `<config dir>/oxytank/config.toml` (`~/.config` on Linux)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::identity::IdentityConfig;
use crate::mqtt::config::{MqttConfig, ReconnectConfig, TopicConfig};
use crate::tank::{OxygenLevel, TankSettings};

pub const CONFIG_ENV: &str = "OXYTANK_CONFIG";
const CONFIG_DIR: &str = "oxytank";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to access config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub broker: MqttConfig,
    pub identity: IdentityConfig,
    pub topics: TopicConfig,
    pub tank: TankSettings,
    pub reconnect: ReconnectConfig,
}

impl Config {
    /// Resolves the config path from the environment or the user config dir.
    pub fn default_path() -> PathBuf {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return PathBuf::from(path);
        }
        let mut base = dirs::config_dir().unwrap_or_else(|| {
            warn!("No config directory available, using working directory");
            PathBuf::from(".")
        });
        base.push(CONFIG_DIR);
        base.push(CONFIG_FILE);
        base
    }

    /// Loads `path`, writing the default config there first if it is missing.
    pub async fn load_or_create(path: &Path) -> Result<Self, ConfigError> {
        let exists = tokio::fs::try_exists(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        if !exists {
            info!("No config at {}, writing defaults", path.display());
            let config = Config::default();
            config.save(path).await?;
            return Ok(config);
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let config: Config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        info!("Loaded config from {}", path.display());
        debug!("{:?}", config);
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| ConfigError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        let content = toml::to_string_pretty(self)?;
        tokio::fs::write(path, content)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.host.trim().is_empty() {
            return Err(ConfigError::Invalid("broker.host is empty".to_string()));
        }
        if self.broker.port == 0 {
            return Err(ConfigError::Invalid("broker.port must not be 0".to_string()));
        }
        if self.broker.request_capacity == 0 {
            return Err(ConfigError::Invalid(
                "broker.request_capacity must not be 0".to_string(),
            ));
        }
        if self.identity.prefix.is_empty() {
            return Err(ConfigError::Invalid("identity.prefix is empty".to_string()));
        }
        if self.topics.root.trim_matches('/').is_empty() {
            return Err(ConfigError::Invalid("topics.root is empty".to_string()));
        }
        if OxygenLevel::new(self.tank.initial_level).is_none() {
            return Err(ConfigError::Invalid(format!(
                "tank.initial_level {} outside {}..={}",
                self.tank.initial_level,
                OxygenLevel::MIN,
                OxygenLevel::MAX
            )));
        }
        let intervals = [
            ("tank.step_interval_ms", self.tank.step_interval_ms),
            ("reconnect.short_delay_ms", self.reconnect.short_delay_ms),
            ("reconnect.long_delay_ms", self.reconnect.long_delay_ms),
            ("reconnect.resolve_retry_ms", self.reconnect.resolve_retry_ms),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Invalid(format!("{} must not be 0", name)));
        }
        Ok(())
    }
}

//! Node configuration, stored as TOML in the user's config directory.
//!
//! Every section falls back to its defaults, so a partial file (or an empty one)
//! still yields a working node. The file is created with the defaults on first
//! start; `SENSORNODE_CONFIG` points the node at a different file.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

use crate::hardware::HardwareConfig;
use crate::mqtt::config::{BrokerConfig, TopicConfig};
use crate::node::dispatcher::ServoParsing;

pub const CONFIG_ENV: &str = "SENSORNODE_CONFIG";
const CONFIG_DIR: &str = "sensornode";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct SamplingConfig {
    /// Time between two sample-and-publish passes
    pub interval_ms: u32,
    /// Pause between two iterations of the control loop
    pub poll_interval_ms: u64,
    /// Time between two statistics summaries in the log
    pub stats_interval_ms: u32,
    /// Settling time of the climate sensor before the boot self-test
    pub sensor_warmup_ms: u64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 2000,
            poll_interval_ms: 10,
            stats_interval_ms: 10_000,
            sensor_warmup_ms: 2000,
        }
    }
}

impl SamplingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn sensor_warmup(&self) -> Duration {
        Duration::from_millis(self.sensor_warmup_ms)
    }
}

/// Backoff between failed connection attempts. `initial_backoff_ms = 0` retries
/// on every loop iteration.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ReconnectConfig {
    pub initial_backoff_ms: u32,
    pub max_backoff_ms: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct CommandConfig {
    /// Drop servo payloads that are not a number instead of treating them as 0°
    pub strict_servo_parsing: bool,
}

impl CommandConfig {
    pub fn servo_parsing(&self) -> ServoParsing {
        if self.strict_servo_parsing {
            ServoParsing::Strict
        } else {
            ServoParsing::Lenient
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// One of trace, debug, info, warn, error
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn level(&self) -> Result<Level, ConfigError> {
        Level::from_str(self.level.trim())
            .map_err(|e| invalid("logging.level", format!("{:?}: {}", self.level, e)))
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct NodeConfig {
    pub broker: BrokerConfig,
    pub topics: TopicConfig,
    pub sampling: SamplingConfig,
    pub reconnect: ReconnectConfig,
    pub commands: CommandConfig,
    pub hardware: HardwareConfig,
    pub logging: LoggingConfig,
}

impl NodeConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: NodeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.host.trim().is_empty() {
            return Err(invalid("broker.host", "must not be empty"));
        }
        if self.broker.port == 0 {
            return Err(invalid("broker.port", "must not be 0"));
        }
        if self.broker.connect_timeout_ms == 0 {
            return Err(invalid("broker.connect_timeout_ms", "must be positive"));
        }

        for (name, topic) in self.topics.named() {
            if topic.is_empty() {
                return Err(invalid("topics", format!("{name} topic must not be empty")));
            }
            if topic.contains(['+', '#']) {
                return Err(invalid(
                    "topics",
                    format!("{name} topic {topic:?} must not contain wildcards"),
                ));
            }
        }
        if self.topics.led == self.topics.servo {
            return Err(invalid(
                "topics",
                "led and servo must be different topics",
            ));
        }

        if self.sampling.interval_ms == 0 {
            return Err(invalid("sampling.interval_ms", "must be positive"));
        }
        if self.sampling.stats_interval_ms == 0 {
            return Err(invalid("sampling.stats_interval_ms", "must be positive"));
        }

        if self.reconnect.max_backoff_ms < self.reconnect.initial_backoff_ms {
            return Err(invalid(
                "reconnect.max_backoff_ms",
                "must not be smaller than initial_backoff_ms",
            ));
        }

        let hw = &self.hardware;
        if hw.servo_min_pulse_us >= hw.servo_max_pulse_us {
            return Err(invalid(
                "hardware.servo_min_pulse_us",
                "must be smaller than servo_max_pulse_us",
            ));
        }
        if hw.servo_max_pulse_us >= hw.servo_period_ms.saturating_mul(1000) {
            return Err(invalid(
                "hardware.servo_max_pulse_us",
                "must fit inside servo_period_ms",
            ));
        }
        if hw.ldr_channel > 7 {
            return Err(invalid("hardware.ldr_channel", "MCP3008 has channels 0-7"));
        }

        self.logging.level()?;
        Ok(())
    }

    /// Writes the default configuration to `path` unless a file is already there.
    ///
    /// Returns whether a file was created.
    pub async fn ensure_default_config(path: &Path) -> Result<bool> {
        if tokio::fs::try_exists(path)
            .await
            .map_err(|e| eyre!("Failed to check for config file {}: {}", path.display(), e))?
        {
            return Ok(false);
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| eyre!("Failed to create config directory: {}", e))?;
        }

        let content = NodeConfig::default()
            .to_toml_string()
            .map_err(|e| eyre!("Failed to serialize default config: {}", e))?;
        tokio::fs::write(path, content)
            .await
            .map_err(|e| eyre!("Failed to write config file {}: {}", path.display(), e))?;
        Ok(true)
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;
        NodeConfig::from_toml_str(&content)
            .map_err(|e| eyre!("Invalid config file {}: {}", path.display(), e))
    }
}

/// `$SENSORNODE_CONFIG`, or `<config dir>/sensornode/config.toml`.
pub fn config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        return Ok(PathBuf::from(path));
    }
    let mut path = dirs::config_dir().ok_or_else(|| eyre!("No config directory for this user"))?;
    path.push(CONFIG_DIR);
    path.push(CONFIG_FILE);
    Ok(path)
}

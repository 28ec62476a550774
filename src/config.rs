//! Application configuration
//!
//! Loaded once at startup from a TOML file under the user config directory
//! (override with `SENSEBRIDGE_CONFIG`). A default file is written on first
//! run so a fresh install has something to edit.

use std::env;
use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// Environment variable overriding the config file location
const CONFIG_ENV: &str = "SENSEBRIDGE_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to serialize default config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Could not resolve a config directory on this system")]
    PathError,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct Config {
    #[serde(default)]
    pub mqtt: MqttSection,

    #[serde(default)]
    pub sensehat: SenseHatSection,

    #[serde(default)]
    pub bridge: BridgeSection,
}

/// Broker connection and topic naming
#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(default)]
pub struct MqttSection {
    /// `[scheme://]host[:port]` with scheme `mqtt`, `tcp`, or `ws`
    pub broker_address: String,

    /// First topic segment, omitted when empty
    pub zone: Option<String>,

    /// Second topic segment, omitted when empty
    pub room: Option<String>,

    /// Third topic segment and base of every client id
    pub client_name: String,

    pub user: Option<String>,
    pub password: Option<String>,
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            broker_address: "mqtt://localhost:1883".to_string(),
            zone: None,
            room: None,
            client_name: "sensebridge".to_string(),
            user: None,
            password: None,
        }
    }
}

/// Sense HAT hardware knobs
#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(default)]
pub struct SenseHatSection {
    /// Decimal places kept on published sensor values
    pub rounding: u32,

    /// Factor applied to raw acceleration before publishing
    pub acceleration_multiplier: f64,

    /// Factor applied to raw angular rate before publishing
    pub gyroscope_multiplier: f64,

    /// Dim the LED matrix
    pub low_light: bool,

    /// Fill the matrix briefly on startup
    pub welcome_flash: bool,
}

impl Default for SenseHatSection {
    fn default() -> Self {
        Self {
            rounding: 2,
            acceleration_multiplier: 1.0,
            gyroscope_multiplier: 1.0,
            low_light: false,
            welcome_flash: true,
        }
    }
}

/// Streaming loop timing
#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(default)]
pub struct BridgeSection {
    /// Seconds between sensor readings
    pub resolution_secs: u64,

    /// Milliseconds between LED command-queue polls
    pub command_poll_ms: u64,
}

impl Default for BridgeSection {
    fn default() -> Self {
        Self {
            resolution_secs: 60,
            command_poll_ms: 250,
        }
    }
}

impl Config {
    /// Resolves the config file path
    pub fn path() -> Result<PathBuf, ConfigError> {
        if let Ok(path) = env::var(CONFIG_ENV) {
            return Ok(PathBuf::from(path));
        }
        let base = dirs::config_dir().ok_or(ConfigError::PathError)?;
        Ok(base.join("sensebridge").join("config.toml"))
    }

    /// Loads the config, writing a default file first if none exists
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Self::path()?)
    }

    pub fn load_from(path: PathBuf) -> Result<Self, ConfigError> {
        if !path.exists() {
            Self::write_default(&path)?;
        }
        let raw = fs::read_to_string(&path)?;
        let config = toml::from_str(&raw)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    fn write_default(path: &PathBuf) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let rendered = toml::to_string_pretty(&Config::default())?;
        fs::write(path, rendered)?;
        info!("Wrote default configuration to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let config = Config::load_from(path.clone()).unwrap();
        assert!(path.exists());
        assert_eq!(config.mqtt.broker_address, "mqtt://localhost:1883");
        assert_eq!(config.mqtt.client_name, "sensebridge");
        assert_eq!(config.bridge.resolution_secs, 60);
    }

    #[test]
    fn partial_file_falls_back_to_field_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
[mqtt]
broker_address = "ws://broker.local:9001"
zone = "home"

[sensehat]
rounding = 4
"#,
        )
        .unwrap();

        let config = Config::load_from(path).unwrap();
        assert_eq!(config.mqtt.broker_address, "ws://broker.local:9001");
        assert_eq!(config.mqtt.zone.as_deref(), Some("home"));
        assert_eq!(config.mqtt.client_name, "sensebridge");
        assert_eq!(config.sensehat.rounding, 4);
        assert_eq!(config.sensehat.acceleration_multiplier, 1.0);
        assert_eq!(config.bridge.command_poll_ms, 250);
    }

    #[test]
    fn default_config_round_trips_through_toml() {
        let rendered = toml::to_string_pretty(&Config::default()).unwrap();
        let parsed: Config = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.mqtt.broker_address, Config::default().mqtt.broker_address);
        assert_eq!(parsed.sensehat.rounding, Config::default().sensehat.rounding);
    }

    #[test]
    fn malformed_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "not valid toml [[").unwrap();
        assert!(matches!(
            Config::load_from(path),
            Err(ConfigError::ParseError(_))
        ));
    }
}

//! Persistent configuration model and defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::protocol::{DeviceTarget, DEFAULT_CAST_PORT};
use crate::transport::castv2::TransportSettings;

/// Root configuration persisted to `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    #[serde(default)]
    /// Which device to control.
    pub device: DeviceConfig,
    #[serde(default)]
    /// Connection timing.
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    /// Receiver applications senders may bind to.
    pub applications: ApplicationsConfig,
    #[serde(default)]
    pub tts: TtsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Target device. An empty host means "discover by name".
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct DeviceConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Delay before a reconnect attempt after an error or failed connect.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_discovery_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ApplicationsConfig {
    /// Catalog keys each sender accepts, e.g. `default_media`, `youtube`.
    #[serde(default = "default_supported_applications")]
    pub supported: Vec<String>,
    /// Join any running media-capable application when no specific one matches.
    #[serde(default = "default_true")]
    pub accept_generic: bool,
}

/// Google Translate TTS defaults for the `TTS` command.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct TtsConfig {
    #[serde(default = "default_tts_language")]
    pub language: String,
    #[serde(default = "default_tts_speed")]
    pub speed: f64,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            name: String::new(),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_discovery_timeout_ms(),
        }
    }
}

impl Default for ApplicationsConfig {
    fn default() -> Self {
        Self {
            supported: default_supported_applications(),
            accept_generic: default_true(),
        }
    }
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            language: default_tts_language(),
            speed: default_tts_speed(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Device target built from `[device]`.
    pub fn device_target(&self) -> DeviceTarget {
        let name = Some(self.device.name.trim())
            .filter(|name| !name.is_empty())
            .map(ToString::to_string);
        DeviceTarget {
            host: self.device.host.trim().to_string(),
            port: self.device.port,
            name,
        }
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.connection.reconnect_delay_ms)
    }

    pub fn transport_settings(&self) -> TransportSettings {
        TransportSettings {
            connect_timeout: Duration::from_millis(self.connection.connect_timeout_ms),
            request_timeout: Duration::from_millis(self.connection.request_timeout_ms),
            heartbeat_interval: Duration::from_millis(self.connection.heartbeat_interval_ms),
            discovery_timeout: Duration::from_millis(self.discovery.timeout_ms),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Default config location: `<config_dir>/castlink/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("castlink").join("config.toml"))
}

/// Loads and sanitizes a config file. A missing file yields defaults.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        log::info!(
            "Config file not found, using defaults. path={}",
            path.display()
        );
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config = toml::from_str::<Config>(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(sanitize_config(config))
}

/// Clamps timing and TTS values into usable ranges.
pub fn sanitize_config(config: Config) -> Config {
    let connect_timeout_ms = config.connection.connect_timeout_ms.clamp(500, 60_000);
    let request_timeout_ms = config.connection.request_timeout_ms.clamp(500, 120_000);
    let reconnect_delay_ms = config.connection.reconnect_delay_ms.clamp(100, 300_000);
    let heartbeat_interval_ms = config.connection.heartbeat_interval_ms.clamp(1_000, 60_000);
    let discovery_timeout_ms = config.discovery.timeout_ms.clamp(250, 30_000);
    let speed = if config.tts.speed.is_finite() {
        config.tts.speed.clamp(0.1, 3.0)
    } else {
        default_tts_speed()
    };
    let language = Some(config.tts.language.trim())
        .filter(|language| !language.is_empty())
        .map(ToString::to_string)
        .unwrap_or_else(default_tts_language);
    let mut supported: Vec<String> = config
        .applications
        .supported
        .iter()
        .map(|key| key.trim().to_ascii_lowercase())
        .filter(|key| !key.is_empty())
        .collect();
    supported.dedup();

    Config {
        device: DeviceConfig {
            host: config.device.host.trim().to_string(),
            port: if config.device.port == 0 {
                default_port()
            } else {
                config.device.port
            },
            name: config.device.name.trim().to_string(),
        },
        connection: ConnectionConfig {
            connect_timeout_ms,
            request_timeout_ms,
            reconnect_delay_ms,
            heartbeat_interval_ms,
        },
        discovery: DiscoveryConfig {
            timeout_ms: discovery_timeout_ms,
        },
        applications: ApplicationsConfig {
            supported,
            accept_generic: config.applications.accept_generic,
        },
        tts: TtsConfig { language, speed },
        logging: config.logging,
    }
}

fn default_true() -> bool {
    true
}

fn default_port() -> u16 {
    DEFAULT_CAST_PORT
}

fn default_connect_timeout_ms() -> u64 {
    6_000
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_reconnect_delay_ms() -> u64 {
    3_000
}

fn default_heartbeat_interval_ms() -> u64 {
    5_000
}

fn default_discovery_timeout_ms() -> u64 {
    1_800
}

fn default_tts_language() -> String {
    "en".to_string()
}

fn default_tts_speed() -> f64 {
    1.0
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_supported_applications() -> Vec<String> {
    crate::adapters::BUILTIN_APPLICATION_KEYS
        .iter()
        .map(ToString::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_has_expected_values() {
        let config = Config::default();
        assert_eq!(config.device.port, 8009);
        assert!(config.device.host.is_empty());
        assert_eq!(config.connection.connect_timeout_ms, 6_000);
        assert_eq!(config.connection.reconnect_delay_ms, 3_000);
        assert_eq!(config.discovery.timeout_ms, 1_800);
        assert!(config.applications.accept_generic);
        assert!(config
            .applications
            .supported
            .iter()
            .any(|key| key == "default_media"));
        assert_eq!(config.tts.language, "en");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let parsed: Config = toml::from_str(
            r#"
[device]
host = "192.168.1.40"

[connection]
reconnect_delay_ms = 1500
"#,
        )
        .expect("config should parse");
        assert_eq!(parsed.device.host, "192.168.1.40");
        assert_eq!(parsed.device.port, 8009);
        assert_eq!(parsed.connection.reconnect_delay_ms, 1_500);
        assert_eq!(parsed.connection.request_timeout_ms, 10_000);
        assert_eq!(parsed.tts, TtsConfig::default());
    }

    #[test]
    fn test_system_config_template_matches_default_values() {
        let parsed: Config = toml::from_str(include_str!("../config/config.system.toml"))
            .expect("system config template should parse");
        assert_eq!(parsed, Config::default());
    }

    #[test]
    fn test_sanitize_config_clamps_out_of_range_values() {
        let mut input = Config::default();
        input.device.port = 0;
        input.device.host = "  10.0.0.2 ".to_string();
        input.connection.reconnect_delay_ms = 0;
        input.connection.heartbeat_interval_ms = 10;
        input.tts.speed = f64::NAN;
        input.tts.language = "   ".to_string();
        input.applications.supported = vec![" YouTube ".to_string(), String::new()];

        let sanitized = sanitize_config(input);
        assert_eq!(sanitized.device.port, 8009);
        assert_eq!(sanitized.device.host, "10.0.0.2");
        assert_eq!(sanitized.connection.reconnect_delay_ms, 100);
        assert_eq!(sanitized.connection.heartbeat_interval_ms, 1_000);
        assert_eq!(sanitized.tts.speed, 1.0);
        assert_eq!(sanitized.tts.language, "en");
        assert_eq!(sanitized.applications.supported, vec!["youtube".to_string()]);
    }

    #[test]
    fn test_device_target_from_name_only_requires_discovery() {
        let mut config = Config::default();
        config.device.name = "Living Room".to_string();
        let target = config.device_target();
        assert!(target.needs_discovery());
        assert_eq!(target.name.as_deref(), Some("Living Room"));
    }

    #[test]
    fn test_missing_config_file_yields_defaults() {
        let path = std::env::temp_dir().join("castlink-config-that-does-not-exist.toml");
        let config = load_config(&path).expect("missing file should load defaults");
        assert_eq!(config, Config::default());
    }
}

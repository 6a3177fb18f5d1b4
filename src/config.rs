//! Configuration management for the relay
//!
//! Handles loading and saving relay configuration from YAML files. Every
//! field carries a default so a partial file (or none at all) still yields a
//! runnable configuration; only the key has no usable default and is
//! validated at startup.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::warn;

use crate::constants::{DEFAULT_MAX_DUMMY_DATA, KEEPALIVE_INTERVAL_SECS};
use crate::relay::{MaskingMode, RelaySettings};

/// Relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Loopback port the WireGuard client points at (0 = ephemeral)
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// Remote relay endpoint as host:port
    #[serde(default)]
    pub remote: String,
    /// Obfuscation key shared with the remote relay (1-255 bytes)
    #[serde(default)]
    pub key: String,
    /// Outer framing: bare obfuscated bytes or STUN masking
    #[serde(default)]
    pub masking: MaskingMode,
    /// Padding cap for data packets
    #[serde(default = "default_max_dummy_data")]
    pub max_dummy_data: u16,
    /// Keepalive cadence in seconds when masking (0 disables)
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Optional path to an ANSI log theme file
    pub log_theme_path: Option<String>,
    /// Whether to mirror logs to a rolling file
    #[serde(default)]
    pub log_to_file: bool,
    /// Log file path when file logging is enabled
    pub log_file_path: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_port: default_listen_port(),
            remote: String::new(),
            key: String::new(),
            masking: MaskingMode::default(),
            max_dummy_data: default_max_dummy_data(),
            keepalive_secs: default_keepalive_secs(),
            log_level: default_log_level(),
            log_theme_path: None,
            log_to_file: false,
            log_file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub async fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        match fs::read_to_string(&path).await {
            Ok(contents) => {
                let config: Config = serde_yaml::from_str(&contents).map_err(|e| {
                    anyhow::anyhow!("Failed to parse YAML configuration: {}", e)
                })?;
                config.validate()?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(
                    "Configuration file not found at '{}', using defaults",
                    path.as_ref().display()
                );
                Ok(Config::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Failed to read configuration file '{}': {}",
                path.as_ref().display(),
                e
            )),
        }
    }

    /// Save configuration to a YAML file
    pub async fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let yaml = serde_yaml::to_string(self)?;
        fs::write(path, yaml).await?;
        Ok(())
    }

    /// Validate configuration fields
    pub fn validate(&self) -> anyhow::Result<()> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.log_level.to_uppercase().as_str()) {
            return Err(anyhow::anyhow!("Invalid log level: {}", self.log_level));
        }
        if self.key.len() > 255 {
            return Err(anyhow::anyhow!(
                "Obfuscation key exceeds 255 bytes ({})",
                self.key.len()
            ));
        }
        Ok(())
    }

    /// Relay parameters derived from this configuration
    pub fn relay_settings(&self) -> RelaySettings {
        RelaySettings {
            listen_port: self.listen_port,
            remote: self.remote.clone(),
            key: self.key.as_bytes().to_vec(),
            masking: self.masking,
            max_dummy_data: self.max_dummy_data,
            keepalive_interval: Duration::from_secs(self.keepalive_secs),
        }
    }
}

fn default_listen_port() -> u16 {
    51821
}

fn default_max_dummy_data() -> u16 {
    DEFAULT_MAX_DUMMY_DATA
}

fn default_keepalive_secs() -> u64 {
    KEEPALIVE_INTERVAL_SECS
}

fn default_log_level() -> String {
    "INFO".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.listen_port, 51821);
        assert_eq!(config.masking, MaskingMode::None);
        assert_eq!(config.max_dummy_data, 4);
        assert_eq!(config.keepalive_secs, 10);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: Config =
            serde_yaml::from_str("remote: \"vps.example.net:51820\"\nkey: \"sekrit\"\n").unwrap();
        assert_eq!(config.remote, "vps.example.net:51820");
        assert_eq!(config.key, "sekrit");
        assert_eq!(config.listen_port, 51821);
        assert_eq!(config.masking, MaskingMode::None);
    }

    #[test]
    fn test_masking_mode_parsing() {
        let config: Config = serde_yaml::from_str("masking: stun\n").unwrap();
        assert_eq!(config.masking, MaskingMode::Stun);
        let config: Config = serde_yaml::from_str("masking: none\n").unwrap();
        assert_eq!(config.masking, MaskingMode::None);
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        let config = Config {
            log_level: "LOUD".to_string(),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_relay_settings_conversion() {
        let config = Config {
            listen_port: 7000,
            remote: "10.0.0.1:51820".to_string(),
            key: "testkey".to_string(),
            masking: MaskingMode::Stun,
            keepalive_secs: 10,
            ..Config::default()
        };
        let settings = config.relay_settings();
        assert_eq!(settings.listen_port, 7000);
        assert_eq!(settings.remote, "10.0.0.1:51820");
        assert_eq!(settings.key, b"testkey");
        assert_eq!(settings.masking, MaskingMode::Stun);
        assert_eq!(settings.keepalive_interval, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_yaml_roundtrip_on_disk() {
        let dir = std::env::temp_dir().join("wgveil-config-test");
        let path = dir.join("wgveil.yml");
        let config = Config {
            remote: "198.51.100.7:51820".to_string(),
            key: "roundtrip".to_string(),
            masking: MaskingMode::Stun,
            ..Config::default()
        };

        config.save(&path).await.unwrap();
        let loaded = Config::load(&path).await.unwrap();
        assert_eq!(loaded.remote, config.remote);
        assert_eq!(loaded.key, config.key);
        assert_eq!(loaded.masking, MaskingMode::Stun);

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn test_missing_file_yields_defaults() {
        let loaded = Config::load("/nonexistent/wgveil-does-not-exist.yml")
            .await
            .unwrap();
        assert_eq!(loaded.listen_port, 51821);
        assert!(loaded.key.is_empty());
    }
}

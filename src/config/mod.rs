//! Configuration module
//!
//! Handles loading and saving bitlink configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::protocol::{BASE_PORT, DEFAULT_NUM_NODES};

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Network settings
    #[serde(default)]
    pub network: NetworkConfig,

    /// Fault injection settings
    #[serde(default)]
    pub faults: FaultConfig,
}

/// General configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Enable verbose logging
    #[serde(default)]
    pub verbose: bool,
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// First node's port; node `i` listens on `base_port + i`
    #[serde(default = "default_base_port")]
    pub base_port: u16,

    /// Number of nodes the supervisor starts
    #[serde(default = "default_num_nodes")]
    pub num_nodes: u16,

    /// Loopback interface to bind and dial
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Driver connect timeout in ms
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Driver response-read timeout in ms
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
}

fn default_base_port() -> u16 {
    BASE_PORT
}

fn default_num_nodes() -> u16 {
    DEFAULT_NUM_NODES
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_connect_timeout() -> u64 {
    2000
}

fn default_read_timeout() -> u64 {
    3000
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            base_port: default_base_port(),
            num_nodes: default_num_nodes(),
            bind_address: default_bind_address(),
            connect_timeout_ms: default_connect_timeout(),
            read_timeout_ms: default_read_timeout(),
        }
    }
}

/// Fault injection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaultConfig {
    /// Lower bound of the DELAY_PACKET sleep in ms
    #[serde(default = "default_delay_min")]
    pub delay_min_ms: u64,

    /// Upper bound of the DELAY_PACKET sleep in ms
    #[serde(default = "default_delay_max")]
    pub delay_max_ms: u64,
}

fn default_delay_min() -> u64 {
    500
}

fn default_delay_max() -> u64 {
    1500
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            delay_min_ms: default_delay_min(),
            delay_max_ms: default_delay_max(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the default location
    pub fn load_default() -> ConfigResult<Self> {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("bitlink/config.toml")),
            Some(PathBuf::from("./bitlink.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                return Self::load(path);
            }
        }

        // Return default config if no file found
        Ok(Self::default())
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Network settings in the form the server/client layer consumes.
    pub fn net(&self) -> crate::network::NetworkConfig {
        crate::network::NetworkConfig {
            base_port: self.network.base_port,
            bind_address: self.network.bind_address.clone(),
            connect_timeout_ms: self.network.connect_timeout_ms,
            read_timeout_ms: self.network.read_timeout_ms,
            delay_range_ms: (self.faults.delay_min_ms, self.faults.delay_max_ms),
        }
    }
}

/// Generate a sample configuration file
pub fn generate_sample_config() -> String {
    let config = Config {
        network: NetworkConfig {
            num_nodes: 6,
            ..Default::default()
        },
        ..Default::default()
    };

    toml::to_string_pretty(&config).unwrap()
}

//! Configuration management for the pusher gateway.
//!
//! Handles loading, validation, and conversion of configuration from TOML
//! files and command-line arguments.

use anyhow::Context;
use pusher_gateway::GatewayConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Application configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Front server settings
    pub server: ServerSettings,
    /// Back-end pool settings
    pub backs: BackSettings,
    /// Admin service settings
    pub admin: AdminSettings,
    /// Logging settings
    pub logging: LoggingSettings,
}

/// Front-server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Network address to bind the front server to
    pub bind_address: String,
    /// Maximum number of concurrent client connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Whether to use SO_REUSEPORT for multi-threaded accept loops
    #[serde(default)]
    pub use_reuse_port: bool,
    /// Zone-event batch size threshold
    #[serde(default = "default_batch_max_size")]
    pub batch_max_size: usize,
    /// Zone-event batch flush interval in milliseconds
    #[serde(default = "default_batch_flush_interval_ms")]
    pub batch_flush_interval_ms: u64,
    /// Forward kicks for spaces unknown locally (historical behavior)
    #[serde(default = "default_true")]
    pub forward_unknown_space_kicks: bool,
}

/// Back-end pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackSettings {
    /// One `ws://host:port` endpoint per back-end instance, in index order
    pub endpoints: Vec<String>,
}

/// Admin-service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminSettings {
    /// Base URL of the admin REST service
    pub base_url: String,
    /// Bearer token for admin-service calls
    #[serde(default)]
    pub api_token: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    #[serde(default)]
    pub json_format: bool,
}

fn default_max_connections() -> usize {
    10_000
}

fn default_batch_max_size() -> usize {
    32
}

fn default_batch_flush_interval_ms() -> u64 {
    100
}

fn default_true() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                bind_address: "127.0.0.1:8080".to_string(),
                max_connections: default_max_connections(),
                use_reuse_port: false,
                batch_max_size: default_batch_max_size(),
                batch_flush_interval_ms: default_batch_flush_interval_ms(),
                forward_unknown_space_kicks: true,
            },
            backs: BackSettings {
                endpoints: vec!["ws://127.0.0.1:9090".to_string()],
            },
            admin: AdminSettings {
                base_url: "http://127.0.0.1:9091".to_string(),
                api_token: String::new(),
            },
            logging: LoggingSettings {
                level: "info".to_string(),
                json_format: false,
            },
        }
    }
}

impl AppConfig {
    /// Loads configuration from a file, writing the defaults there when
    /// the file does not exist yet.
    pub async fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let config: AppConfig =
                toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, content)
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Converts to the gateway configuration.
    pub fn to_gateway_config(&self) -> anyhow::Result<GatewayConfig> {
        Ok(GatewayConfig {
            bind_address: self
                .server
                .bind_address
                .parse()
                .with_context(|| format!("invalid bind address {}", self.server.bind_address))?,
            max_connections: self.server.max_connections,
            use_reuse_port: self.server.use_reuse_port,
            batch_max_size: self.server.batch_max_size,
            batch_flush_interval_ms: self.server.batch_flush_interval_ms,
            forward_unknown_space_kicks: self.server.forward_unknown_space_kicks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = AppConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.server.bind_address, config.server.bind_address);
        assert_eq!(parsed.backs.endpoints, config.backs.endpoints);
    }

    #[test]
    fn gateway_config_conversion_validates_the_address() {
        let mut config = AppConfig::default();
        config.server.bind_address = "not an address".to_string();
        assert!(config.to_gateway_config().is_err());
    }
}

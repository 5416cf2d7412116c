//! Server configuration

use crate::error::ConfigError;
use dungeon_shared::DEFAULT_PORT;
use serde::Deserialize;
use std::path::Path;

/// Everything the server reads at startup
///
/// Missing keys in a config file fall back to the defaults below; command
/// line flags are applied on top by the binary.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Target simulation rate
    pub turns_per_second: f64,
    pub max_clients: usize,
    /// Frames buffered per connection before the peer is dropped
    pub outbox_capacity: usize,
    /// Number of recent turn timings the simulation keeps
    pub timing_history: usize,
    /// Dispatch backlog above which the simulation warns and stretches its sleep
    pub backlog_warning: usize,
    pub map_width: i32,
    pub map_height: i32,
    pub creature_count: usize,
    /// Seed for the demo map and creature behaviour
    pub seed: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            turns_per_second: 1.4,
            max_clients: 16,
            outbox_capacity: 1024,
            timing_history: 10,
            backlog_warning: 256,
            map_width: 16,
            map_height: 16,
            creature_count: 4,
            seed: 0,
        }
    }
}

impl ServerConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: ServerConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.turns_per_second.is_finite() && self.turns_per_second > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "turns_per_second must be positive, got {}",
                self.turns_per_second
            )));
        }
        if self.max_clients == 0 {
            return Err(ConfigError::Invalid("max_clients must be at least 1".into()));
        }
        if self.outbox_capacity == 0 {
            return Err(ConfigError::Invalid(
                "outbox_capacity must be at least 1".into(),
            ));
        }
        // Border ring plus at least one interior tile.
        if self.map_width < 3 || self.map_height < 3 {
            return Err(ConfigError::Invalid(format!(
                "map must be at least 3x3, got {}x{}",
                self.map_width, self.map_height
            )));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

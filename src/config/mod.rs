//! Server configuration.
//!
//! Every field has a default, so an empty TOML document is a valid config.
//!
//! ```
//! use switchyard::config::ServerConfig;
//!
//! let config = ServerConfig::from_toml_str(r#"
//!     read_timeout = 10
//!     keep_alive = false
//!     server_name = "edge"
//! "#).unwrap();
//!
//! assert_eq!(config.read_timeout(), Some(std::time::Duration::from_secs(10)));
//! assert!(!config.keep_alive);
//! assert_eq!(config.route_cache_capacity, 2048);
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::http::request::DEFAULT_MAX_HEAD_SIZE;
use crate::router::DEFAULT_CACHE_CAPACITY;
use crate::stream::TransportOptions;
use crate::stream::transport::{DEFAULT_HIGH_WATER, DEFAULT_LOW_WATER};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {}", .0.join(", "))]
    Validation(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Seconds allowed for a request head to arrive. `None` waits forever.
    pub read_timeout: Option<u64>,
    /// Keep connections open between requests when the client allows it.
    pub keep_alive: bool,
    /// Value of the `Server` header.
    pub server_name: String,
    /// Largest request head, in bytes, before the connection answers 431.
    pub max_head_size: usize,
    pub route_cache_capacity: usize,
    /// Queued output bytes at which writers are paused.
    pub write_high_water: usize,
    /// Queued output bytes at which paused writers resume.
    pub write_low_water: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            read_timeout: None,
            keep_alive: true,
            server_name: "switchyard".to_owned(),
            max_head_size: DEFAULT_MAX_HEAD_SIZE,
            route_cache_capacity: DEFAULT_CACHE_CAPACITY,
            write_high_water: DEFAULT_HIGH_WATER,
            write_low_water: DEFAULT_LOW_WATER,
        }
    }
}

impl ServerConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: ServerConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Reports every semantic problem at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.read_timeout == Some(0) {
            errors.push("read_timeout must be greater than zero".to_owned());
        }
        if self.max_head_size == 0 {
            errors.push("max_head_size must be greater than zero".to_owned());
        }
        if self.route_cache_capacity == 0 {
            errors.push("route_cache_capacity must be greater than zero".to_owned());
        }
        if self.write_high_water == 0 {
            errors.push("write_high_water must be greater than zero".to_owned());
        }
        if self.write_low_water > self.write_high_water {
            errors.push(format!(
                "write_low_water ({}) exceeds write_high_water ({})",
                self.write_low_water, self.write_high_water
            ));
        }
        if self.server_name.trim().is_empty() {
            errors.push("server_name must not be empty".to_owned());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout.map(Duration::from_secs)
    }

    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout.map(|d| d.as_secs().max(1));
        self
    }

    #[must_use]
    pub fn with_keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    #[must_use]
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = name.into();
        self
    }

    #[must_use]
    pub fn with_max_head_size(mut self, bytes: usize) -> Self {
        self.max_head_size = bytes;
        self
    }

    #[must_use]
    pub fn with_route_cache_capacity(mut self, capacity: usize) -> Self {
        self.route_cache_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_write_water_marks(mut self, high: usize, low: usize) -> Self {
        self.write_high_water = high;
        self.write_low_water = low;
        self
    }

    /// Transport settings for each accepted connection.
    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            high_water: self.write_high_water,
            low_water: self.write_low_water,
            ..TransportOptions::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = ServerConfig::from_toml_str("").unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.server_name, "switchyard");
        assert!(config.keep_alive);
        assert_eq!(config.read_timeout(), None);
    }

    #[test]
    fn water_marks_flow_into_transport_options() {
        let config = ServerConfig::from_toml_str(
            "write_high_water = 1024\nwrite_low_water = 256\n",
        )
        .unwrap();
        let options = config.transport_options();
        assert_eq!(options.high_water, 1024);
        assert_eq!(options.low_water, 256);
    }

    #[test]
    fn collects_every_validation_error() {
        let err = ServerConfig::from_toml_str(
            "route_cache_capacity = 0\nmax_head_size = 0\nwrite_high_water = 10\nwrite_low_water = 20\n",
        )
        .unwrap_err();
        match err {
            ConfigError::Validation(errors) => assert_eq!(errors.len(), 3),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = ServerConfig::from_toml_str("port = 80\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = ServerConfig::from_file("/nonexistent/switchyard.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn builder_setters() {
        let config = ServerConfig::default()
            .with_read_timeout(Some(Duration::from_secs(5)))
            .with_keep_alive(false)
            .with_server_name("edge")
            .with_max_head_size(4096)
            .with_route_cache_capacity(16);
        assert!(config.validate().is_ok());
        assert_eq!(config.max_head_size, 4096);
        assert_eq!(config.read_timeout(), Some(Duration::from_secs(5)));
        assert_eq!(config.route_cache_capacity, 16);
    }
}

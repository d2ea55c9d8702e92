//! Configuration for EmberKV
//!
//! The server reads a single TOML file named on the command line. Every
//! section and field is optional:
//!
//! ```toml
//! [server]
//! port = 6379
//! bind = "127.0.0.1"
//! max_clients = 10000
//! log_level = "info"
//!
//! [protocol]
//! max_inline_size = 65536
//! max_bulk_size = 536870912
//!
//! [expiry]
//! interval_ms = 100
//! samples_per_cycle = 100
//! ```

use crate::protocol::ParserLimits;
use crate::storage::ExpiryConfig;
use crate::{EmberError, Result};
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub protocol: ParserLimits,
    pub expiry: ExpiryConfig,
}

/// Listener and connection settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port to listen on (0 picks a free port)
    pub port: u16,

    /// Address to bind to
    pub bind: String,

    /// Connections beyond this are refused with an error reply
    pub max_clients: usize,

    /// Default tracing filter, overridden by `RUST_LOG`
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: crate::DEFAULT_PORT,
            bind: crate::DEFAULT_HOST.to_string(),
            max_clients: 10000,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            EmberError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)
            .map_err(|e| EmberError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        self.server
            .bind
            .parse::<IpAddr>()
            .map_err(|e| EmberError::Config(format!("Invalid bind address '{}': {e}", self.server.bind)))?;

        if self.server.max_clients == 0 {
            return Err(EmberError::Config("max_clients must be at least 1".into()));
        }
        if self.protocol.max_inline_size == 0 || self.protocol.max_bulk_size == 0 {
            return Err(EmberError::Config("protocol limits must be non-zero".into()));
        }
        Ok(())
    }

    /// The socket address the listener binds to
    pub fn bind_address(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .server
            .bind
            .parse()
            .map_err(|e| EmberError::Config(format!("Invalid bind address: {e}")))?;
        Ok(SocketAddr::new(ip, self.server.port))
    }
}

//! Server configuration.
//!
//! Provides [`ServerConfig`] with serde defaults for file loading and a
//! fluent [`ServerConfigBuilder`] that validates on `build()`.
//!
//! # Example
//!
//! ```
//! use roomcast::ServerConfig;
//!
//! # fn example() -> roomcast::Result<()> {
//! let config = ServerConfig::builder()
//!     .port(9000)
//!     .room_prefix("/rooms/")
//!     .max_connections(64)
//!     .queue_capacity(32)
//!     .build()?;
//!
//! assert_eq!(config.socket_addr().port(), 9000);
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ============================================================================
// Defaults
// ============================================================================

fn default_bind_ip() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    8080
}

fn default_room_prefix() -> String {
    "/ws/".to_string()
}

fn default_max_connections() -> usize {
    1024
}

fn default_queue_capacity() -> usize {
    256
}

fn default_static_root() -> PathBuf {
    PathBuf::from(".")
}

// ============================================================================
// ServerConfig
// ============================================================================

/// Runtime configuration of the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Address to listen on.
    #[serde(default = "default_bind_ip")]
    pub bind_ip: IpAddr,

    /// Port to listen on (0 for an OS-assigned port).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Path prefix of WebSocket room endpoints, e.g. `/ws/`.
    #[serde(default = "default_room_prefix")]
    pub room_prefix: String,

    /// Maximum concurrently accepted connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Outbound queue capacity per client.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Directory served for non-WebSocket requests.
    #[serde(default = "default_static_root")]
    pub static_root: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_ip: default_bind_ip(),
            port: default_port(),
            room_prefix: default_room_prefix(),
            max_connections: default_max_connections(),
            queue_capacity: default_queue_capacity(),
            static_root: default_static_root(),
        }
    }
}

impl ServerConfig {
    /// Creates a builder starting from the defaults.
    #[inline]
    #[must_use]
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::new()
    }

    /// Returns the listen address.
    #[inline]
    #[must_use]
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.port)
    }

    /// Parses and validates a JSON configuration.
    ///
    /// Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// - [`Error::Json`] if the JSON is invalid or has unknown fields
    /// - [`Error::Config`] if validation fails
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON configuration file.
    ///
    /// # Errors
    ///
    /// - [`Error::Io`] if the file cannot be read
    /// - [`Error::Json`] / [`Error::Config`] as in [`Self::from_json_str`]
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Checks value constraints.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(Error::config("max_connections must be greater than 0"));
        }

        if self.queue_capacity == 0 {
            return Err(Error::config("queue_capacity must be greater than 0"));
        }

        if !self.room_prefix.starts_with('/') || !self.room_prefix.ends_with('/') {
            return Err(Error::config(format!(
                "room_prefix must start and end with '/': {:?}",
                self.room_prefix
            )));
        }

        Ok(())
    }
}

// ============================================================================
// ServerConfigBuilder
// ============================================================================

/// Builder for [`ServerConfig`].
#[derive(Debug, Default, Clone)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl From<ServerConfig> for ServerConfigBuilder {
    fn from(config: ServerConfig) -> Self {
        Self { config }
    }
}

impl ServerConfigBuilder {
    /// Creates a builder with default values.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the listen address.
    #[inline]
    #[must_use]
    pub fn bind_ip(mut self, ip: IpAddr) -> Self {
        self.config.bind_ip = ip;
        self
    }

    /// Sets the listen port.
    #[inline]
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Sets the room path prefix.
    #[inline]
    #[must_use]
    pub fn room_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.room_prefix = prefix.into();
        self
    }

    /// Sets the concurrent connection cap.
    #[inline]
    #[must_use]
    pub fn max_connections(mut self, max: usize) -> Self {
        self.config.max_connections = max;
        self
    }

    /// Sets the per-client queue capacity.
    #[inline]
    #[must_use]
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    /// Sets the static file root.
    #[inline]
    #[must_use]
    pub fn static_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.static_root = root.into();
        self
    }

    /// Validates and returns the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a value is out of range.
    pub fn build(self) -> Result<ServerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// ============================================================================
// Tests
// ============================================================================

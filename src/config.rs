//! Server Configuration
//!
//! The settings a host hands to the policy server before it starts:
//! where to listen, which policy to serve, and how long to wait for a
//! client to send its request.
//!
//! Values arrive from an outer configuration layer (the CLI in `main.rs`
//! for the standalone binary). Bad values never abort configuration;
//! they are logged and the default is kept.

use crate::{DEFAULT_HOST, DEFAULT_PORT, DEFAULT_SOCKET_TIMEOUT};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Configuration for a [`PolicyServer`](crate::server::PolicyServer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Host to bind to (default: 0.0.0.0)
    pub host: String,

    /// Port to listen on (default: 843)
    pub port: u16,

    /// Policy file to serve instead of the built-in document
    pub policy_file: Option<PathBuf>,

    /// How long a connection may stay silent before it is closed (default: 30s)
    pub socket_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            policy_file: None,
            socket_timeout: DEFAULT_SOCKET_TIMEOUT,
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_host(&mut self, host: impl Into<String>) {
        self.host = host.into();
    }

    pub fn set_port(&mut self, port: u16) {
        self.port = port;
    }

    pub fn set_policy_file(&mut self, path: impl AsRef<Path>) {
        self.policy_file = Some(path.as_ref().to_path_buf());
    }

    /// Sets the read timeout from a string of whole seconds.
    ///
    /// Anything that is not a positive integer is logged and ignored, so
    /// the current value (30s unless already changed) stays in effect.
    ///
    /// # Example
    ///
    /// ```
    /// use flashpolicy::ServerConfig;
    /// use std::time::Duration;
    ///
    /// let mut config = ServerConfig::default();
    /// config.set_socket_timeout("5");
    /// assert_eq!(config.socket_timeout, Duration::from_secs(5));
    ///
    /// config.set_socket_timeout("abc");
    /// assert_eq!(config.socket_timeout, Duration::from_secs(5));
    /// ```
    pub fn set_socket_timeout(&mut self, value: &str) {
        match parse_timeout_secs(value) {
            Some(timeout) => self.socket_timeout = timeout,
            None => warn!(
                value = %value,
                fallback_secs = self.socket_timeout.as_secs(),
                "Invalid socket timeout, keeping current value"
            ),
        }
    }

    /// Returns the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Parses a positive number of seconds.
fn parse_timeout_secs(value: &str) -> Option<Duration> {
    match value.trim().parse::<u64>() {
        Ok(0) | Err(_) => None,
        Ok(secs) => Some(Duration::from_secs(secs)),
    }
}

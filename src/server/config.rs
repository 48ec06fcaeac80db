//! Server configuration.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::crypto::{Authenticator, SharedKey, WindowPolicy};
use crate::error::{Error, Result};
use crate::proxy::check_host_port;

/// Default listen address.
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:443";

/// Default address of the real backend (a local Mumble server).
pub const DEFAULT_BACKEND_ADDR: &str = "127.0.0.1:64738";

/// Default deadline for the first bytes of a connection.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(3);

/// Server configuration.
///
/// Built once at startup and shared read-only by every connection task.
#[derive(Clone)]
pub struct ServerConfig {
    /// Listen address (`host:port`)
    pub listen_addr: String,
    /// Real backend reached by authenticated clients
    pub backend_addr: String,
    /// Decoy web server every other connection is relayed to
    pub decoy_addr: String,
    /// Shared secret and its derived key
    pub key: SharedKey,
    /// Time source for the credential window
    pub clock: Arc<dyn Clock>,
    /// Which credential windows are accepted
    pub window_policy: WindowPolicy,
    /// Deadline for the initial read
    pub handshake_timeout: Duration,
}

impl ServerConfig {
    /// Create a configuration with default addresses and the system clock.
    pub fn new(secret: impl Into<String>, decoy_addr: impl Into<String>) -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            backend_addr: DEFAULT_BACKEND_ADDR.to_string(),
            decoy_addr: decoy_addr.into(),
            key: SharedKey::derive(secret),
            clock: Arc::new(SystemClock),
            window_policy: WindowPolicy::default(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Authenticator bound to this configuration's key, clock and policy.
    pub fn authenticator(&self) -> Authenticator {
        Authenticator::new(self.key.clone(), Arc::clone(&self.clock), self.window_policy)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        self.listen_addr
            .parse::<SocketAddr>()
            .map_err(|e| Error::config(format!("listen_addr {:?}: {}", self.listen_addr, e)))?;
        check_host_port("backend_addr", &self.backend_addr)?;
        check_host_port("decoy_addr", &self.decoy_addr)?;
        if self.key.secret().is_empty() {
            return Err(Error::config("secret cannot be empty"));
        }
        if self.handshake_timeout.is_zero() {
            return Err(Error::config("handshake_timeout must be positive"));
        }
        Ok(())
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("listen_addr", &self.listen_addr)
            .field("backend_addr", &self.backend_addr)
            .field("decoy_addr", &self.decoy_addr)
            .field("key", &self.key)
            .field("window_policy", &self.window_policy)
            .field("handshake_timeout", &self.handshake_timeout)
            .finish()
    }
}

/// Configuration file format (TOML).
#[derive(Debug, Serialize, Deserialize)]
pub struct ServerConfigFile {
    /// Listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Real backend address
    #[serde(default = "default_backend_addr")]
    pub backend_addr: String,
    /// Decoy web server address
    pub decoy_addr: String,
    /// Shared secret string
    pub secret: String,
    /// `current-only` or `allow-previous`
    #[serde(default)]
    pub window_policy: WindowPolicy,
    /// Initial read deadline (milliseconds)
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
}

fn default_listen_addr() -> String {
    DEFAULT_LISTEN_ADDR.to_string()
}

fn default_backend_addr() -> String {
    DEFAULT_BACKEND_ADDR.to_string()
}

fn default_handshake_timeout_ms() -> u64 {
    DEFAULT_HANDSHAKE_TIMEOUT.as_millis() as u64
}

impl ServerConfigFile {
    /// Parse a TOML document.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::config(e.to_string()))
    }

    /// Render as a TOML document.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::config(e.to_string()))
    }

    /// Fresh configuration with a random 32-byte base64 secret.
    pub fn generate(decoy_addr: impl Into<String>) -> Self {
        use base64::{engine::general_purpose::STANDARD, Engine};

        let secret: [u8; 32] = crate::crypto::entropy::array();
        Self::from_config(&ServerConfig::new(STANDARD.encode(secret), decoy_addr))
    }

    /// Convert to runtime configuration (system clock).
    pub fn to_config(&self) -> Result<ServerConfig> {
        let config = ServerConfig {
            listen_addr: self.listen_addr.clone(),
            backend_addr: self.backend_addr.clone(),
            decoy_addr: self.decoy_addr.clone(),
            key: SharedKey::derive(self.secret.clone()),
            clock: Arc::new(SystemClock),
            window_policy: self.window_policy,
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
        };
        config.validate()?;
        Ok(config)
    }

    /// Create from runtime configuration.
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            listen_addr: config.listen_addr.clone(),
            backend_addr: config.backend_addr.clone(),
            decoy_addr: config.decoy_addr.clone(),
            secret: config.key.secret().to_string(),
            window_policy: config.window_policy,
            handshake_timeout_ms: config.handshake_timeout.as_millis() as u64,
        }
    }
}

//! Client configuration.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::crypto::{entropy, Authenticator, SharedKey, WindowPolicy};
use crate::error::{Error, Result};
use crate::proxy::check_host_port;
use crate::tls::MAX_SERVER_NAME_LEN;

/// Default local listen address for the HTTP CONNECT front.
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:1081";

/// Default session ticket lifetime hint (seconds).
pub const DEFAULT_TICKET_TIME_HINT: u32 = 3600;

/// The only port local applications may ask for by default (Mumble).
pub const DEFAULT_ALLOWED_PORT: u16 = 64738;

/// Default deadline for dialing and handshaking with the remote.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Client configuration.
#[derive(Clone)]
pub struct ClientConfig {
    /// Local listen address
    pub listen_addr: String,
    /// Tunnel server address (`host:port`)
    pub remote_addr: String,
    /// Cover host name sent as SNI
    pub server_name: String,
    /// Shared secret and its derived key
    pub key: SharedKey,
    /// Time source for the credential window
    pub clock: Arc<dyn Clock>,
    /// Session ticket lifetime hint placed in every ClientHello
    pub ticket_time_hint: u32,
    /// Randomizer mixed into the session ticket, fixed for the process
    pub opaque: u32,
    /// Host names local applications may connect to
    pub allowed_hosts: Vec<String>,
    /// Port local applications must connect to
    pub allowed_port: u16,
    /// Deadline for dialing and the handshake with the remote
    pub connect_timeout: Duration,
}

impl ClientConfig {
    /// Create a configuration with defaults and a fresh opaque value.
    ///
    /// The SNI defaults to the host part of `remote_addr`.
    pub fn new(
        secret: impl Into<String>,
        remote_addr: impl Into<String>,
        allowed_hosts: Vec<String>,
    ) -> Self {
        let remote_addr = remote_addr.into();
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            server_name: host_of(&remote_addr).to_string(),
            remote_addr,
            key: SharedKey::derive(secret),
            clock: Arc::new(SystemClock),
            ticket_time_hint: DEFAULT_TICKET_TIME_HINT,
            opaque: entropy::u32(),
            allowed_hosts,
            allowed_port: DEFAULT_ALLOWED_PORT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Authenticator producing the ClientHello random field.
    pub fn authenticator(&self) -> Authenticator {
        Authenticator::new(self.key.clone(), Arc::clone(&self.clock), WindowPolicy::CurrentOnly)
    }

    /// Whether a local application may open a tunnel to `host:port`.
    pub fn permits(&self, host: &str, port: u16) -> bool {
        port == self.allowed_port
            && self
                .allowed_hosts
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(host))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        self.listen_addr
            .parse::<SocketAddr>()
            .map_err(|e| Error::config(format!("listen_addr {:?}: {}", self.listen_addr, e)))?;
        check_host_port("remote_addr", &self.remote_addr)?;
        if self.key.secret().is_empty() {
            return Err(Error::config("secret cannot be empty"));
        }
        if self.server_name.is_empty() {
            return Err(Error::config("server_name cannot be empty"));
        }
        if self.server_name.len() > MAX_SERVER_NAME_LEN {
            return Err(Error::config(format!(
                "server_name is {} bytes, at most {} allowed",
                self.server_name.len(),
                MAX_SERVER_NAME_LEN
            )));
        }
        if self.allowed_hosts.is_empty() {
            return Err(Error::config("at least one allowed host must be configured"));
        }
        if self.connect_timeout.is_zero() {
            return Err(Error::config("connect_timeout must be positive"));
        }
        Ok(())
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("listen_addr", &self.listen_addr)
            .field("remote_addr", &self.remote_addr)
            .field("server_name", &self.server_name)
            .field("key", &self.key)
            .field("ticket_time_hint", &self.ticket_time_hint)
            .field("allowed_hosts", &self.allowed_hosts)
            .field("allowed_port", &self.allowed_port)
            .finish()
    }
}

fn host_of(addr: &str) -> &str {
    let host = addr.rsplit_once(':').map_or(addr, |(host, _)| host);
    host.trim_start_matches('[').trim_end_matches(']')
}

/// Configuration file format (JSON).
#[derive(Debug, Serialize, Deserialize)]
pub struct ClientConfigFile {
    /// Local listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Tunnel server address
    pub remote_addr: String,
    /// Shared secret string
    pub secret: String,
    /// Cover host name (defaults to the host of `remote_addr`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    /// Session ticket lifetime hint (seconds)
    #[serde(default = "default_ticket_time_hint")]
    pub ticket_time_hint: u32,
    /// Host names local applications may connect to
    pub allowed_hosts: Vec<String>,
    /// Port local applications must connect to
    #[serde(default = "default_allowed_port")]
    pub allowed_port: u16,
    /// Dial and handshake deadline (milliseconds)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_listen_addr() -> String {
    DEFAULT_LISTEN_ADDR.to_string()
}

fn default_ticket_time_hint() -> u32 {
    DEFAULT_TICKET_TIME_HINT
}

fn default_allowed_port() -> u16 {
    DEFAULT_ALLOWED_PORT
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT.as_millis() as u64
}

impl ClientConfigFile {
    /// Parse a JSON document.
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| Error::config(e.to_string()))
    }

    /// Render as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::config(e.to_string()))
    }

    /// Convert to runtime configuration (system clock, fresh opaque value).
    pub fn to_config(&self) -> Result<ClientConfig> {
        let mut config = ClientConfig::new(
            self.secret.clone(),
            self.remote_addr.clone(),
            self.allowed_hosts.clone(),
        );
        config.listen_addr = self.listen_addr.clone();
        if let Some(name) = &self.server_name {
            config.server_name = name.clone();
        }
        config.ticket_time_hint = self.ticket_time_hint;
        config.allowed_port = self.allowed_port;
        config.connect_timeout = Duration::from_millis(self.connect_timeout_ms);

        config.validate()?;
        Ok(config)
    }

    /// Create from runtime configuration.
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            listen_addr: config.listen_addr.clone(),
            remote_addr: config.remote_addr.clone(),
            secret: config.key.secret().to_string(),
            server_name: Some(config.server_name.clone()),
            ticket_time_hint: config.ticket_time_hint,
            allowed_hosts: config.allowed_hosts.clone(),
            allowed_port: config.allowed_port,
            connect_timeout_ms: config.connect_timeout.as_millis() as u64,
        }
    }
}

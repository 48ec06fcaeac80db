//! # masq
//!
//! A TCP tunnel that looks like an abbreviated TLS 1.2 session to anyone
//! watching the wire, and like an ordinary HTTPS reverse proxy to anyone
//! probing the server.
//!
//! ## Architecture Overview
//!
//! ```text
//!  local app ──CONNECT──▶ masq-client ════ TLS-shaped records ════▶ masq-server ──▶ backend
//!                                                                       │
//!                         scanners, crawlers, browsers ─────────────────┴──▶ decoy
//! ```
//!
//! The client authenticates by hiding a 12-hour time-window token, encrypted
//! with a key derived from the shared secret, inside the 32 random bytes of
//! its ClientHello. The server parses every first flight; anything that does
//! not parse or does not carry a valid token is relayed untouched to a decoy
//! web server. Authenticated connections finish a fake handshake and are then
//! bridged to the backend, each chunk carried as one application-data record.
//!
//! ## Layers
//!
//! - [`crypto`]: key derivation, token computation and embedding
//! - [`tls`]: record codec, ClientHello parser, handshake message builders
//! - [`proxy`]: wrap/unwrap pumps, bridges, the HTTP CONNECT front
//! - [`server`] / [`client`]: the per-connection dispatchers and accept loops

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod clock;
pub mod crypto;
pub mod error;
pub mod proxy;
pub mod tls;

#[cfg(feature = "server")]
pub mod server;

#[cfg(feature = "client")]
pub mod client;

pub use clock::{Clock, FixedClock, SystemClock};
pub use crypto::{Authenticator, SharedKey, WindowPolicy};
pub use error::{Error, Result};

/// Crate version, reported by the binaries.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Byte plumbing shared by both ends of the tunnel.
//!
//! - [`relay`]: record wrap/unwrap pumps, bridges, and the plain decoy relay
//! - [`connect`]: the HTTP CONNECT front the client exposes to local apps

pub mod connect;
pub mod relay;

use std::time::Duration;

use tokio::net::TcpStream;

use crate::error::{Error, Result};

/// Dial `addr` with a deadline and disable Nagle on the new socket.
pub async fn dial(addr: &str, deadline: Duration) -> Result<TcpStream> {
    let stream = tokio::time::timeout(deadline, TcpStream::connect(addr))
        .await
        .map_err(|_| Error::Timeout(deadline.as_millis() as u64))??;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Check that a configured address has the form `host:port`.
pub(crate) fn check_host_port(field: &str, addr: &str) -> Result<()> {
    match addr.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => Ok(()),
        _ => Err(Error::config(format!("{} must be host:port, got {:?}", field, addr))),
    }
}

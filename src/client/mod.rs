//! Client-side dispatcher.
//!
//! Local applications talk plain HTTP CONNECT to the client. An allowed
//! request opens one covert TLS session to the server and is then bridged:
//! outbound application bytes are wrapped into records, inbound records are
//! unwrapped.

pub mod config;

pub use config::{ClientConfig, ClientConfigFile};

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

use crate::crypto::Authenticator;
use crate::error::{Error, Result};
use crate::proxy::connect::accept_connect;
use crate::proxy::{dial, relay};
use crate::tls::{client_reply, read_record, ClientHelloBuilder};

/// Records the server sends in reply to our hello (ServerHello, CCS, Finished).
const SERVER_REPLY_RECORDS: usize = 3;

/// Buffer used while discarding the server's reply.
const REPLY_BUF_LEN: usize = 1024;

/// Main client instance.
pub struct Client {
    config: Arc<ClientConfig>,
    authenticator: Arc<Authenticator>,
    hello: Arc<ClientHelloBuilder>,
}

impl Client {
    /// Create a new client with the given configuration.
    pub fn new(config: ClientConfig) -> Self {
        let hello = ClientHelloBuilder::new(
            config.server_name.clone(),
            config.ticket_time_hint,
            config.opaque,
        );
        Self {
            authenticator: Arc::new(config.authenticator()),
            hello: Arc::new(hello),
            config: Arc::new(config),
        }
    }

    /// Bind the configured local address.
    pub async fn bind(&self) -> Result<TcpListener> {
        let listener = TcpListener::bind(&self.config.listen_addr).await?;
        tracing::info!("masq client listening on {}", listener.local_addr()?);
        Ok(listener)
    }

    /// Bind and serve forever.
    pub async fn run(&self) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener, std::future::pending()).await
    }

    /// Accept local applications on `listener` until `shutdown` resolves.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => self.spawn_connection(stream, peer_addr),
                    Err(e) => tracing::warn!("Accept error: {}", e),
                },
            }
        }
    }

    fn spawn_connection(&self, stream: TcpStream, peer_addr: SocketAddr) {
        let config = Arc::clone(&self.config);
        let authenticator = Arc::clone(&self.authenticator);
        let hello = Arc::clone(&self.hello);

        tokio::spawn(async move {
            match Self::handle_connection(&config, &authenticator, &hello, stream).await {
                Ok(()) => {}
                Err(e) if e.is_transport() => {
                    tracing::debug!("{}: connection ended: {}", peer_addr, e)
                }
                Err(e) => tracing::warn!("{}: connection failed: {}", peer_addr, e),
            }
        });
    }

    async fn handle_connection(
        config: &ClientConfig,
        authenticator: &Authenticator,
        hello: &ClientHelloBuilder,
        stream: TcpStream,
    ) -> Result<()> {
        stream.set_nodelay(true)?;
        let request = accept_connect(stream).await?;

        // Gate before any traffic leaves the machine
        if !config.permits(request.host(), request.port()) {
            let target = format!("{}:{}", request.host(), request.port());
            request.reject(403).await?;
            return Err(Error::TargetRejected(target));
        }

        let mut remote = match establish_tunnel(config, authenticator, hello).await {
            Ok(remote) => remote,
            Err(e) => {
                tracing::warn!("tunnel to {} failed: {}", config.remote_addr, e);
                request.reject(503).await?;
                return Err(e);
            }
        };

        tracing::debug!("tunnel open for {}:{}", request.host(), request.port());
        let (local, leftover) = request.establish().await?;
        if !leftover.is_empty() {
            relay::write_wrapped(&mut remote, &leftover).await?;
        }

        let stats = relay::bridge(local, remote).await?;
        tracing::debug!(
            "tunnel closed: {} bytes out, {} bytes in",
            stats.wrapped,
            stats.unwrapped
        );
        Ok(())
    }
}

/// Compose a ClientHello carrying a fresh credential.
pub fn compose_init_handshake(
    authenticator: &Authenticator,
    hello: &ClientHelloBuilder,
) -> Vec<u8> {
    hello.build(&authenticator.client_random())
}

/// Dial the server and run the client half of the mimicked handshake.
///
/// On success the returned stream is ready for application-data records.
pub async fn establish_tunnel(
    config: &ClientConfig,
    authenticator: &Authenticator,
    hello: &ClientHelloBuilder,
) -> Result<TcpStream> {
    let handshake = async {
        let mut remote = dial(&config.remote_addr, config.connect_timeout).await?;
        remote.write_all(&compose_init_handshake(authenticator, hello)).await?;

        let mut buf = [0u8; REPLY_BUF_LEN];
        for _ in 0..SERVER_REPLY_RECORDS {
            read_record(&mut remote, &mut buf).await?;
        }

        remote.write_all(&client_reply()).await?;
        Ok::<_, Error>(remote)
    };

    tokio::time::timeout(config.connect_timeout, handshake)
        .await
        .map_err(|_| Error::Timeout(config.connect_timeout.as_millis() as u64))?
}

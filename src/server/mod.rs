//! Server-side dispatcher.
//!
//! Every inbound connection goes through the same state machine:
//!
//! ```text
//!   accept ──▶ await initial bytes (3 s) ──timeout──▶ close
//!                     │
//!                     ▼
//!                 classify ──parse or credential failure──▶ Fallback:
//!                     │                                      decoy <══ plain copy ══> peer
//!                     ▼
//!               Authenticated:
//!                 send ServerHello/CCS/Finished
//!                 discard client CCS + Finished
//!                 dial backend
//!                 backend <══ wrap/unwrap pumps ══> peer
//! ```
//!
//! Anyone who does not hold the shared secret only ever talks to the decoy.

pub mod config;
mod metrics;

pub use config::{ServerConfig, ServerConfigFile};
pub use metrics::{MetricsSnapshot, ServerMetrics};

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout, timeout_at, Instant};

use crate::crypto::Authenticator;
use crate::error::{Error, Result};
use crate::proxy::{dial, relay};
use crate::tls::{
    parse_client_hello, read_record, server_reply, ClientHello, ContentType, RECORD_HEADER_LEN,
};

/// Size of the buffer for the first bytes of a connection.
pub const INITIAL_READ_LEN: usize = 1500;

/// Records the client sends after our reply (ChangeCipherSpec, Finished).
const CLIENT_TAIL_RECORDS: usize = 2;

/// Buffer used while discarding the client's handshake tail.
const TAIL_BUF_LEN: usize = 1024;

/// Outcome of classifying the first bytes of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// A ClientHello carrying a valid credential
    Authenticated(ClientHello),
    /// Anything else, with the bytes already consumed from the peer
    Fallback(Vec<u8>),
}

/// Decide where a connection goes based on its first bytes.
///
/// Parse failures and credential failures produce the same route. Any other
/// error is returned to the caller instead of being routed.
pub fn classify(initial: Vec<u8>, authenticator: &Authenticator) -> Result<Route> {
    let verdict = parse_client_hello(&initial).and_then(|hello| {
        authenticator.check(&hello.random)?;
        Ok(hello)
    });

    match verdict {
        Ok(hello) => Ok(Route::Authenticated(hello)),
        Err(e) if e.is_fallback_trigger() => Ok(Route::Fallback(initial)),
        Err(e) => Err(e),
    }
}

/// Read the first bytes of a connection within `deadline`.
///
/// At least one byte must arrive in time or the connection is dropped. When
/// those bytes start a handshake record, reading continues until the record
/// is complete, the buffer is full, or the deadline passes; whatever has
/// arrived by then is returned.
pub async fn read_initial<R>(stream: &mut R, deadline: Duration) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let until = Instant::now() + deadline;
    let mut buf = vec![0u8; INITIAL_READ_LEN];

    let mut filled = timeout_at(until, stream.read(&mut buf))
        .await
        .map_err(|_| Error::Timeout(deadline.as_millis() as u64))??;
    if filled == 0 {
        return Err(Error::ConnectionClosed);
    }

    while filled < initial_target(&buf[..filled]) {
        match timeout_at(until, stream.read(&mut buf[filled..])).await {
            Ok(Ok(0)) | Err(_) => break,
            Ok(Ok(n)) => filled += n,
            Ok(Err(e)) => return Err(e.into()),
        }
    }

    buf.truncate(filled);
    Ok(buf)
}

/// How many initial bytes are worth waiting for.
fn initial_target(data: &[u8]) -> usize {
    if data.first() != Some(&(ContentType::Handshake as u8)) {
        return data.len();
    }
    if data.len() < RECORD_HEADER_LEN {
        return RECORD_HEADER_LEN;
    }
    let declared = RECORD_HEADER_LEN + u16::from_be_bytes([data[3], data[4]]) as usize;
    declared.min(INITIAL_READ_LEN)
}

/// Main server instance.
pub struct Server {
    config: Arc<ServerConfig>,
    authenticator: Arc<Authenticator>,
    metrics: Arc<ServerMetrics>,
}

impl Server {
    /// Create a new server with the given configuration.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            authenticator: Arc::new(config.authenticator()),
            metrics: Arc::new(ServerMetrics::new()),
            config: Arc::new(config),
        }
    }

    /// Bind the configured listen address.
    pub async fn bind(&self) -> Result<TcpListener> {
        let listener = TcpListener::bind(&self.config.listen_addr).await?;
        tracing::info!("masq server listening on {}", listener.local_addr()?);
        Ok(listener)
    }

    /// Bind and serve forever.
    pub async fn run(&self) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener, std::future::pending()).await
    }

    /// Accept connections on `listener` until `shutdown` resolves.
    ///
    /// Connections already being handled keep running in their own tasks.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("shutting down: {}", self.metrics.snapshot());
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
        let metrics = Arc::clone(&self.metrics);

        tokio::spawn(async move {
            metrics.increment_connections();

            match Self::handle_connection(config, authenticator, metrics.clone(), stream, peer_addr)
                .await
            {
                Ok(()) => {}
                Err(e) if e.is_transport() => {
                    tracing::debug!("{}: connection ended: {}", peer_addr, e)
                }
                Err(e) => tracing::warn!("{}: connection failed: {}", peer_addr, e),
            }

            metrics.decrement_connections();
        });
    }

    async fn handle_connection(
        config: Arc<ServerConfig>,
        authenticator: Arc<Authenticator>,
        metrics: Arc<ServerMetrics>,
        mut stream: TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<()> {
        stream.set_nodelay(true)?;

        let initial = match read_initial(&mut stream, config.handshake_timeout).await {
            Ok(initial) => initial,
            Err(e) => {
                metrics.increment_initial_read_failures();
                return Err(e);
            }
        };

        match classify(initial, &authenticator)? {
            Route::Fallback(initial) => {
                tracing::debug!("{}: relaying to decoy", peer_addr);
                metrics.increment_fallback();
                Self::relay_to_decoy(&config, stream, initial).await
            }
            Route::Authenticated(hello) => {
                tracing::debug!("{}: authenticated", peer_addr);
                Self::serve_tunnel(&config, &metrics, stream, &hello).await
            }
        }
    }

    async fn relay_to_decoy(
        config: &ServerConfig,
        mut client: TcpStream,
        initial: Vec<u8>,
    ) -> Result<()> {
        let mut decoy = dial(&config.decoy_addr, config.handshake_timeout).await?;
        relay::relay_plain(&mut client, &mut decoy, &initial).await?;
        Ok(())
    }

    async fn serve_tunnel(
        config: &ServerConfig,
        metrics: &ServerMetrics,
        mut client: TcpStream,
        hello: &ClientHello,
    ) -> Result<()> {
        // Committed from here on: failures close the connection, never fall back
        if let Err(e) = Self::finish_handshake(config, &mut client, hello).await {
            metrics.increment_handshake_failures();
            return Err(e);
        }

        let backend = match dial(&config.backend_addr, config.handshake_timeout).await {
            Ok(backend) => backend,
            Err(e) => {
                tracing::warn!("backend {} unreachable: {}", config.backend_addr, e);
                return Err(e);
            }
        };

        metrics.increment_tunneled();
        let stats = relay::bridge(backend, client).await?;
        metrics.add_bridge_bytes(stats.unwrapped, stats.wrapped);
        Ok(())
    }

    async fn finish_handshake(
        config: &ServerConfig,
        client: &mut TcpStream,
        hello: &ClientHello,
    ) -> Result<()> {
        client.write_all(&server_reply(hello)).await?;

        let discard = async {
            let mut buf = [0u8; TAIL_BUF_LEN];
            for _ in 0..CLIENT_TAIL_RECORDS {
                read_record(client, &mut buf).await?;
            }
            Ok::<_, Error>(())
        };
        timeout(config.handshake_timeout, discard)
            .await
            .map_err(|_| Error::Timeout(config.handshake_timeout.as_millis() as u64))?
    }

    /// Get server metrics.
    pub fn metrics(&self) -> &Arc<ServerMetrics> {
        &self.metrics
    }

    /// Get the active configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, FixedClock};
    use crate::crypto::{SharedKey, WindowPolicy};
    use crate::tls::{client_reply, ClientHelloBuilder, MAX_RECORD_LEN};
    use tokio::io::AsyncWriteExt;

    const NOW: i64 = 1_700_000_000;

    fn authenticator(secret: &str) -> Authenticator {
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::from_unix(NOW));
        Authenticator::new(SharedKey::derive(secret), clock, WindowPolicy::CurrentOnly)
    }

    fn hello_for(auth: &Authenticator) -> Vec<u8> {
        ClientHelloBuilder::new("voice.example.com", 3600, 42).build(&auth.client_random())
    }

    #[test]
    fn test_classify_garbage_keeps_bytes() {
        let auth = authenticator("s3cret");
        let stranger = b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n".to_vec();
        assert_eq!(classify(stranger.clone(), &auth).unwrap(), Route::Fallback(stranger));
        assert_eq!(classify(Vec::new(), &auth).unwrap(), Route::Fallback(Vec::new()));
    }

    #[test]
    fn test_classify_truncated_hello_falls_back() {
        let auth = authenticator("s3cret");
        let mut record = hello_for(&auth);
        record.truncate(record.len() / 2);
        assert_eq!(classify(record.clone(), &auth).unwrap(), Route::Fallback(record));
    }

    #[test]
    fn test_classify_valid_hello() {
        let auth = authenticator("s3cret");
        let record = hello_for(&auth);
        match classify(record.clone(), &auth).unwrap() {
            Route::Authenticated(hello) => {
                assert_eq!(hello, parse_client_hello(&record).unwrap());
            }
            other => panic!("expected authenticated, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_wrong_secret_falls_back_with_bytes() {
        let record = hello_for(&authenticator("client-secret"));
        let route = classify(record.clone(), &authenticator("server-secret")).unwrap();
        assert_eq!(route, Route::Fallback(record));
    }

    #[tokio::test]
    async fn test_read_initial_completes_split_record() {
        let (mut server, mut peer) = tokio::io::duplex(4096);
        let record = hello_for(&authenticator("s"));
        let (head, tail) = record.split_at(7);
        let (head, tail) = (head.to_vec(), tail.to_vec());

        let writer = tokio::spawn(async move {
            peer.write_all(&head).await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            peer.write_all(&tail).await.unwrap();
            peer
        });

        let initial = read_initial(&mut server, Duration::from_secs(3)).await.unwrap();
        assert_eq!(initial, record);
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn test_read_initial_plain_bytes_return_at_once() {
        let (mut server, mut peer) = tokio::io::duplex(4096);
        peer.write_all(b"SSH-2.0-OpenSSH_9.6\r\n").await.unwrap();

        let initial = read_initial(&mut server, Duration::from_secs(3)).await.unwrap();
        assert_eq!(initial, b"SSH-2.0-OpenSSH_9.6\r\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_initial_times_out_on_silence() {
        let (mut server, _peer) = tokio::io::duplex(64);
        let err = read_initial(&mut server, Duration::from_secs(3)).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(3000)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_initial_partial_record_returns_at_deadline() {
        let (mut server, mut peer) = tokio::io::duplex(64);
        peer.write_all(&[0x16, 0x03, 0x01, 0x02, 0x00, 0x01]).await.unwrap();

        let initial = read_initial(&mut server, Duration::from_secs(3)).await.unwrap();
        assert_eq!(initial, vec![0x16, 0x03, 0x01, 0x02, 0x00, 0x01]);
    }

    #[tokio::test]
    async fn test_read_initial_eof() {
        let (mut server, peer) = tokio::io::duplex(64);
        drop(peer);
        assert!(matches!(
            read_initial(&mut server, Duration::from_secs(1)).await,
            Err(Error::ConnectionClosed)
        ));
    }

    #[test]
    fn test_initial_target() {
        assert_eq!(initial_target(b"GET /"), 5);
        assert_eq!(initial_target(&[0x16, 0x03]), RECORD_HEADER_LEN);
        assert_eq!(initial_target(&[0x16, 0x03, 0x01, 0x00, 0x10]), 21);
        assert_eq!(initial_target(&[0x16, 0x03, 0x01, 0xff, 0xff]), INITIAL_READ_LEN);
    }

    async fn start_server(config: ServerConfig) -> (SocketAddr, Arc<ServerMetrics>) {
        let server = Server::new(config);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let metrics = Arc::clone(server.metrics());
        tokio::spawn(async move { server.serve(listener, std::future::pending()).await });
        (addr, metrics)
    }

    fn test_config(backend: SocketAddr, decoy: SocketAddr) -> ServerConfig {
        let mut config = ServerConfig::new("s3cret", decoy.to_string())
            .with_clock(Arc::new(FixedClock::from_unix(NOW)));
        config.listen_addr = "127.0.0.1:0".into();
        config.backend_addr = backend.to_string();
        config
    }

    #[tokio::test]
    async fn test_stranger_reaches_decoy_verbatim() {
        let decoy = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let decoy_addr = decoy.local_addr().unwrap();
        let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let backend_addr = backend.local_addr().unwrap();

        let (addr, metrics) = start_server(test_config(backend_addr, decoy_addr)).await;

        // A well-formed hello under the wrong secret is just another stranger
        let stranger = hello_for(&authenticator("not-the-secret"));
        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(&stranger).await.unwrap();

        let (mut upstream, _) = decoy.accept().await.unwrap();
        let mut seen = vec![0u8; stranger.len()];
        upstream.read_exact(&mut seen).await.unwrap();
        assert_eq!(seen, stranger);

        upstream.write_all(b"\x15\x03\x03\x00\x02\x02\x28").await.unwrap();
        let mut alert = [0u8; 7];
        client.read_exact(&mut alert).await.unwrap();
        assert_eq!(&alert, b"\x15\x03\x03\x00\x02\x02\x28");

        assert_eq!(metrics.fallback_connections(), 1);
        assert_eq!(metrics.tunneled_connections(), 0);
    }

    #[tokio::test]
    async fn test_authenticated_client_is_bridged() {
        let decoy = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let decoy_addr = decoy.local_addr().unwrap();
        let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let backend_addr = backend.local_addr().unwrap();

        let (addr, metrics) = start_server(test_config(backend_addr, decoy_addr)).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(&hello_for(&authenticator("s3cret"))).await.unwrap();

        let mut buf = vec![0u8; MAX_RECORD_LEN];
        for _ in 0..3 {
            read_record(&mut client, &mut buf).await.unwrap();
        }
        client.write_all(&client_reply()).await.unwrap();

        let (mut upstream, _) = backend.accept().await.unwrap();

        relay::write_wrapped(&mut client, b"hello backend").await.unwrap();
        let mut got = [0u8; 13];
        upstream.read_exact(&mut got).await.unwrap();
        assert_eq!(&got, b"hello backend");

        upstream.write_all(b"hi").await.unwrap();
        let n = read_record(&mut client, &mut buf).await.unwrap();
        assert_eq!(&buf[..n], &[0x17, 0x03, 0x03, 0x00, 0x02, b'h', b'i']);

        assert_eq!(metrics.tunneled_connections(), 1);
        assert_eq!(metrics.fallback_connections(), 0);

        // Backend hangs up: the client side is closed too
        drop(upstream);
        let closed = timeout(Duration::from_secs(2), read_record(&mut client, &mut buf)).await;
        assert!(matches!(closed, Ok(Err(Error::ConnectionClosed))));
    }

    #[tokio::test]
    async fn test_broken_tail_closes_without_fallback() {
        let decoy = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let decoy_addr = decoy.local_addr().unwrap();
        let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let backend_addr = backend.local_addr().unwrap();

        let (addr, metrics) = start_server(test_config(backend_addr, decoy_addr)).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(&hello_for(&authenticator("s3cret"))).await.unwrap();
        let mut buf = vec![0u8; MAX_RECORD_LEN];
        for _ in 0..3 {
            read_record(&mut client, &mut buf).await.unwrap();
        }
        // Truncated ChangeCipherSpec, then hang up the write side
        client.write_all(&[0x14, 0x03, 0x03]).await.unwrap();
        client.shutdown().await.unwrap();

        let closed = timeout(Duration::from_secs(2), client.read(&mut buf)).await;
        assert!(matches!(closed, Ok(Ok(0)) | Ok(Err(_))));

        let no_decoy = timeout(Duration::from_millis(100), decoy.accept()).await;
        assert!(no_decoy.is_err());
        let no_backend = timeout(Duration::from_millis(100), backend.accept()).await;
        assert!(no_backend.is_err());
        assert_eq!(metrics.fallback_connections(), 0);
    }
}

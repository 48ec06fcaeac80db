//! HTTP CONNECT front for local applications.
//!
//! The client accepts plain HTTP proxy requests from the local application,
//! decides whether the requested target may be tunnelled, and then takes the
//! socket over so framing can start at byte level.

use std::fmt;

use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};

use crate::error::{Error, Result};

/// Upper bound on the request head (request line plus headers).
const MAX_HEAD_LEN: u64 = 8192;

/// A parsed CONNECT request whose socket has not been answered yet.
pub struct ConnectRequest<S> {
    host: String,
    port: u16,
    reader: BufReader<S>,
}

impl<S: AsyncRead> fmt::Debug for ConnectRequest<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectRequest")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("buffered", &self.reader.buffer().len())
            .finish()
    }
}

/// Read and parse an HTTP CONNECT request head from `stream`.
///
/// Non-CONNECT methods are answered with `405` and malformed requests with
/// `400` before the error is returned.
pub async fn accept_connect<S>(stream: S) -> Result<ConnectRequest<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut budget = MAX_HEAD_LEN;

    let request_line = match read_head_line(&mut reader, &mut budget).await? {
        Some(line) => line,
        None => return Err(Error::ConnectionClosed),
    };

    // Drain headers; none of them matter for a tunnel
    loop {
        match read_head_line(&mut reader, &mut budget).await? {
            Some(line) if line.is_empty() => break,
            Some(_) => continue,
            None => return Err(Error::ConnectionClosed),
        }
    }

    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() != 3 {
        respond(reader.get_mut(), 400).await?;
        return Err(Error::InvalidRequest(format!("bad request line: {:?}", request_line)));
    }

    if !parts[0].eq_ignore_ascii_case("CONNECT") {
        respond(reader.get_mut(), 405).await?;
        return Err(Error::InvalidRequest(format!("unsupported method: {}", parts[0])));
    }

    let (host, port) = match parse_authority(parts[1]) {
        Some(target) => target,
        None => {
            respond(reader.get_mut(), 400).await?;
            return Err(Error::InvalidRequest(format!("bad target: {}", parts[1])));
        }
    };

    Ok(ConnectRequest { host, port, reader })
}

impl<S> ConnectRequest<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Requested host name, without brackets for IPv6 literals.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Requested port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Answer with an error status and close.
    pub async fn reject(mut self, status: u16) -> Result<()> {
        respond(self.reader.get_mut(), status).await?;
        self.reader.get_mut().shutdown().await?;
        Ok(())
    }

    /// Answer `200 Connection Established` and take over the socket.
    pub async fn establish(mut self) -> Result<(S, Vec<u8>)> {
        respond(self.reader.get_mut(), 200).await?;
        Ok(self.hijack())
    }

    /// Take over the raw socket without answering.
    ///
    /// Returns the stream together with any bytes the application already
    /// sent past the request head.
    pub fn hijack(self) -> (S, Vec<u8>) {
        let buffered = self.reader.buffer().to_vec();
        (self.reader.into_inner(), buffered)
    }
}

/// Read one CRLF-terminated line of the request head, trimmed.
///
/// `None` means EOF before any byte of the line.
async fn read_head_line<R>(reader: &mut R, budget: &mut u64) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut raw = Vec::new();
    let n = (&mut *reader).take(*budget).read_until(b'\n', &mut raw).await?;
    if n == 0 {
        if *budget == 0 {
            return Err(Error::InvalidRequest("request head too large".into()));
        }
        return Ok(None);
    }
    *budget -= n as u64;

    if raw.last() != Some(&b'\n') {
        return Err(Error::InvalidRequest("unterminated request head".into()));
    }

    let line = String::from_utf8(raw)
        .map_err(|_| Error::InvalidRequest("request head is not UTF-8".into()))?;
    Ok(Some(line.trim().to_string()))
}

/// Split `host:port`, accepting bracketed IPv6 literals.
fn parse_authority(target: &str) -> Option<(String, u16)> {
    let (host, port) = target.rsplit_once(':')?;
    let port: u16 = port.parse().ok()?;

    let host = match host.strip_prefix('[') {
        Some(inner) => inner.strip_suffix(']')?,
        None => host,
    };
    if host.is_empty() || host.contains(['/', ' ']) {
        return None;
    }

    Some((host.to_string(), port))
}

async fn respond<W>(writer: &mut W, status: u16) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let head = format!("HTTP/1.1 {} {}\r\n\r\n", status, reason(status));
    writer.write_all(head.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "Connection Established",
        400 => "Bad Request",
        403 => "Forbidden",
        405 => "Method Not Allowed",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "Error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    async fn read_all<R: AsyncRead + Unpin>(mut reader: R) -> String {
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn test_parse_connect_and_hijack_leftover() {
        let (server, mut app) = duplex(4096);
        let head = b"CONNECT voice.example.com:64738 HTTP/1.1\r\nHost: voice.example.com\r\n\r\n";
        app.write_all(head).await.unwrap();
        app.write_all(b"early").await.unwrap();

        let request = accept_connect(server).await.unwrap();
        assert_eq!(request.host(), "voice.example.com");
        assert_eq!(request.port(), 64738);

        let (mut stream, leftover) = request.establish().await.unwrap();
        assert_eq!(leftover, b"early");

        let mut head = [0u8; 39];
        app.read_exact(&mut head).await.unwrap();
        assert_eq!(&head, b"HTTP/1.1 200 Connection Established\r\n\r\n");

        stream.write_all(b"raw").await.unwrap();
        let mut raw = [0u8; 3];
        app.read_exact(&mut raw).await.unwrap();
        assert_eq!(&raw, b"raw");
    }

    #[tokio::test]
    async fn test_debug_shows_target_and_buffered_len() {
        let (server, mut app) = duplex(4096);
        app.write_all(b"CONNECT voice.example.com:64738 HTTP/1.1\r\n\r\nabc")
            .await
            .unwrap();

        let request = accept_connect(server).await.unwrap();
        let shown = format!("{:?}", request);
        assert!(shown.contains("voice.example.com"));
        assert!(shown.contains("64738"));
        assert!(shown.contains("buffered: 3"));
    }

    #[tokio::test]
    async fn test_reject_writes_status() {
        let (server, mut app) = duplex(4096);
        app.write_all(b"CONNECT evil.example.net:443 HTTP/1.1\r\n\r\n")
            .await
            .unwrap();

        let request = accept_connect(server).await.unwrap();
        request.reject(403).await.unwrap();

        assert_eq!(read_all(app).await, "HTTP/1.1 403 Forbidden\r\n\r\n");
    }

    #[tokio::test]
    async fn test_non_connect_gets_405() {
        let (server, mut app) = duplex(4096);
        app.write_all(b"GET http://example.com/ HTTP/1.1\r\nHost: example.com\r\n\r\n")
            .await
            .unwrap();

        let err = accept_connect(server).await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));

        let mut head = [0u8; 35];
        app.read_exact(&mut head).await.unwrap();
        assert_eq!(&head, b"HTTP/1.1 405 Method Not Allowed\r\n\r\n");
    }

    #[tokio::test]
    async fn test_bad_target_gets_400() {
        let (server, mut app) = duplex(4096);
        app.write_all(b"CONNECT nowhere HTTP/1.1\r\n\r\n").await.unwrap();

        assert!(accept_connect(server).await.is_err());
        let mut head = [0u8; 28];
        app.read_exact(&mut head).await.unwrap();
        assert_eq!(&head, b"HTTP/1.1 400 Bad Request\r\n\r\n");
    }

    #[tokio::test]
    async fn test_oversized_head_rejected() {
        let (server, mut app) = duplex(64 * 1024);
        let mut request = b"CONNECT a.example:1 HTTP/1.1\r\n".to_vec();
        request.extend(std::iter::repeat(b'x').take(MAX_HEAD_LEN as usize));
        app.write_all(&request).await.unwrap();

        assert!(matches!(
            accept_connect(server).await,
            Err(Error::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_eof_before_head() {
        let (server, app) = duplex(64);
        drop(app);
        assert!(matches!(
            accept_connect(server).await,
            Err(Error::ConnectionClosed)
        ));
    }

    #[test]
    fn test_parse_authority() {
        assert_eq!(parse_authority("host:80"), Some(("host".to_string(), 80)));
        assert_eq!(parse_authority("[::1]:443"), Some(("::1".to_string(), 443)));
        assert_eq!(parse_authority("host"), None);
        assert_eq!(parse_authority("host:99999"), None);
        assert_eq!(parse_authority(":80"), None);
        assert_eq!(parse_authority("[::1:443"), None);
    }
}

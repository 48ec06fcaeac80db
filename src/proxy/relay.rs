//! Stream framing pumps and bridges.
//!
//! A bridged connection pairs a plaintext socket (the application or the
//! backend) with a framed socket (the remote tunnel peer). Two pumps run per
//! pair, one per direction:
//!
//! ```text
//!   plaintext ──wrap_pump──▶ [0x17 0x03 0x03 len payload] ──▶ framed
//!   plaintext ◀─unwrap_pump── [0x17 0x03 0x03 len payload] ◀── framed
//! ```
//!
//! The first pump to stop closes the shared [`Teardown`], which cancels the
//! other pump and shuts down both write halves.

use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Notify;

use crate::error::{Error, Result};
use crate::tls::{
    read_record, write_header, ContentType, MAX_PAYLOAD, MAX_RECORD_LEN, RECORD_HEADER_LEN,
    VERSION_TLS12,
};

/// Joint close signal shared by the two pumps of a bridge.
#[derive(Debug, Default)]
pub struct Teardown {
    closed: AtomicBool,
    notify: Notify,
}

impl Teardown {
    /// Create an open signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Close the signal and wake every waiter.
    ///
    /// Returns `true` only for the call that actually closed it; later calls
    /// are no-ops.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.notify.notify_waiters();
        true
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Resolve once the signal is closed.
    pub async fn closed(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a concurrent close is not missed
        notified.as_mut().enable();
        if self.is_closed() {
            return;
        }
        notified.await;
    }
}

/// Byte counts of a finished bridge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    /// Plaintext bytes wrapped into records
    pub wrapped: u64,
    /// Payload bytes unwrapped from records
    pub unwrapped: u64,
}

/// Wrap plaintext into application-data records until either side fails.
///
/// Each read of at most [`MAX_PAYLOAD`] bytes becomes exactly one record,
/// written with a single `write_all`. Returns the plaintext byte count when
/// the reader reaches EOF.
pub async fn wrap_pump<R, W>(plain: &mut R, framed: &mut W) -> Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; MAX_RECORD_LEN];
    let mut total = 0u64;

    loop {
        let n = plain.read(&mut buf[RECORD_HEADER_LEN..]).await?;
        if n == 0 {
            return Ok(total);
        }

        write_header(&mut buf, ContentType::ApplicationData.into(), VERSION_TLS12, n);
        framed.write_all(&buf[..RECORD_HEADER_LEN + n]).await?;
        total += n as u64;
    }
}

/// Unwrap records from the framed side and write their payloads as plaintext.
///
/// The content type of each record is not inspected. Returns the payload
/// byte count once the framed side closes cleanly between records.
pub async fn unwrap_pump<R, W>(framed: &mut R, plain: &mut W) -> Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; MAX_RECORD_LEN];
    let mut total = 0u64;

    loop {
        let n = match read_record(framed, &mut buf).await {
            Ok(n) => n,
            Err(Error::ConnectionClosed) => return Ok(total),
            Err(e) => return Err(e),
        };

        plain.write_all(&buf[RECORD_HEADER_LEN..n]).await?;
        total += (n - RECORD_HEADER_LEN) as u64;
    }
}

/// Write `data` to the framed side as application-data records.
///
/// Used for plaintext that was read before the pumps started, e.g. bytes
/// buffered behind an HTTP CONNECT request.
pub async fn write_wrapped<W>(framed: &mut W, data: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut record = vec![0u8; MAX_RECORD_LEN];
    for chunk in data.chunks(MAX_PAYLOAD) {
        write_header(&mut record, ContentType::ApplicationData.into(), VERSION_TLS12, chunk.len());
        record[RECORD_HEADER_LEN..RECORD_HEADER_LEN + chunk.len()].copy_from_slice(chunk);
        framed.write_all(&record[..RECORD_HEADER_LEN + chunk.len()]).await?;
    }
    Ok(())
}

/// Run both pumps between `plain` and `framed` until either direction stops.
///
/// Both write halves are shut down before this returns, so the peers of both
/// sockets observe EOF.
pub async fn bridge<P, F>(plain: P, framed: F) -> Result<BridgeStats>
where
    P: AsyncRead + AsyncWrite + Send + 'static,
    F: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut plain_rd, mut plain_wr) = tokio::io::split(plain);
    let (mut framed_rd, mut framed_wr) = tokio::io::split(framed);
    let teardown = Arc::new(Teardown::new());

    let wrap_teardown = Arc::clone(&teardown);
    let wrap = tokio::spawn(async move {
        let result = guarded(&wrap_teardown, wrap_pump(&mut plain_rd, &mut framed_wr)).await;
        let _ = framed_wr.shutdown().await;
        result
    });

    let unwrap_teardown = Arc::clone(&teardown);
    let unwrap = tokio::spawn(async move {
        let result = guarded(&unwrap_teardown, unwrap_pump(&mut framed_rd, &mut plain_wr)).await;
        let _ = plain_wr.shutdown().await;
        result
    });

    let (wrapped, unwrapped) = tokio::join!(wrap, unwrap);
    let wrapped = wrapped.map_err(join_error)?;
    let unwrapped = unwrapped.map_err(join_error)?;

    if let Err(e) = &wrapped {
        tracing::debug!("wrap pump stopped: {}", e);
    }
    if let Err(e) = &unwrapped {
        tracing::debug!("unwrap pump stopped: {}", e);
    }

    Ok(BridgeStats {
        wrapped: wrapped.unwrap_or_default(),
        unwrapped: unwrapped.unwrap_or_default(),
    })
}

/// Forward `initial` to `upstream`, then copy bytes both ways until either side closes.
pub async fn relay_plain<A, B>(
    client: &mut A,
    upstream: &mut B,
    initial: &[u8],
) -> Result<(u64, u64)>
where
    A: AsyncRead + AsyncWrite + Unpin + ?Sized,
    B: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    upstream.write_all(initial).await?;
    let (up, down) = tokio::io::copy_bidirectional(client, upstream).await?;
    Ok((up + initial.len() as u64, down))
}

/// Run `pump` until it finishes or the teardown fires, then close the teardown.
async fn guarded<T>(teardown: &Teardown, pump: T) -> Result<u64>
where
    T: Future<Output = Result<u64>>,
{
    let result = tokio::select! {
        result = pump => result,
        _ = teardown.closed() => Err(Error::ConnectionClosed),
    };
    teardown.close();
    result
}

fn join_error(e: tokio::task::JoinError) -> Error {
    Error::Network(io::Error::new(io::ErrorKind::Other, e))
}

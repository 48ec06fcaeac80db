//! TLS record layer framing.
//!
//! ```text
//! +------+---------+---------+------------------+
//! | type | version | length  | payload          |
//! |  1B  |   2B    | 2B (BE) | length bytes     |
//! +------+---------+---------+------------------+
//! ```

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result};
use crate::tls::{MAX_PAYLOAD, RECORD_HEADER_LEN};

/// Write a record header for `len` payload bytes into the first five bytes of `buf`.
///
/// `buf` must be at least [`RECORD_HEADER_LEN`] long and `len` at most
/// [`MAX_PAYLOAD`]; callers in this crate guarantee both.
pub fn write_header(buf: &mut [u8], content_type: u8, version: [u8; 2], len: usize) {
    debug_assert!(len <= MAX_PAYLOAD);
    buf[0] = content_type;
    buf[1..3].copy_from_slice(&version);
    buf[3..5].copy_from_slice(&(len as u16).to_be_bytes());
}

/// Prepend a record header to `payload`.
pub fn add_header(payload: &[u8], content_type: u8, version: [u8; 2]) -> Result<Vec<u8>> {
    if payload.len() > MAX_PAYLOAD {
        return Err(Error::PayloadTooLarge(payload.len()));
    }

    let mut record = vec![0u8; RECORD_HEADER_LEN + payload.len()];
    write_header(&mut record, content_type, version, payload.len());
    record[RECORD_HEADER_LEN..].copy_from_slice(payload);
    Ok(record)
}

/// Strip the record header, returning the payload slice.
pub fn peel_header(record: &[u8]) -> Result<&[u8]> {
    record
        .get(RECORD_HEADER_LEN..)
        .ok_or(Error::IncompleteRead {
            expected: RECORD_HEADER_LEN,
            actual: record.len(),
        })
}

/// Read exactly one record into `buf`, returning header + payload length.
///
/// Short reads are retried until the record is complete. A stream that ends
/// before the first header byte yields [`Error::ConnectionClosed`]; one that
/// ends inside a record yields [`Error::IncompleteRead`].
pub async fn read_record<R>(reader: &mut R, buf: &mut [u8]) -> Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    if buf.len() < RECORD_HEADER_LEN {
        return Err(Error::BufferTooSmall {
            needed: RECORD_HEADER_LEN,
            capacity: buf.len(),
        });
    }

    let got = fill(reader, &mut buf[..RECORD_HEADER_LEN]).await?;
    if got == 0 {
        return Err(Error::ConnectionClosed);
    }
    if got < RECORD_HEADER_LEN {
        return Err(Error::IncompleteRead {
            expected: RECORD_HEADER_LEN,
            actual: got,
        });
    }

    let payload_len = u16::from_be_bytes([buf[3], buf[4]]) as usize;
    let total = RECORD_HEADER_LEN + payload_len;
    if total > buf.len() {
        return Err(Error::BufferTooSmall {
            needed: total,
            capacity: buf.len(),
        });
    }

    let got = fill(reader, &mut buf[RECORD_HEADER_LEN..total]).await?;
    if got < payload_len {
        return Err(Error::IncompleteRead {
            expected: payload_len,
            actual: got,
        });
    }

    Ok(total)
}

/// Read until `dst` is full or the stream ends; returns bytes read.
async fn fill<R>(reader: &mut R, dst: &mut [u8]) -> Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < dst.len() {
        let n = reader.read(&mut dst[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

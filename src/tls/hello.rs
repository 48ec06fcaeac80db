//! ClientHello parsing.
//!
//! The server feeds whatever the peer sent first into [`parse_client_hello`].
//! Input is attacker controlled, so every declared length is checked against
//! the bytes actually present before it is used.

use crate::crypto::RANDOM_SIZE;
use crate::error::{Error, Result};
use crate::tls::{ContentType, ExtensionType, HandshakeType};

/// A single ClientHello extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extension {
    /// Extension type code
    pub ext_type: u16,
    /// Raw extension body
    pub data: Vec<u8>,
}

/// The fields of a ClientHello relevant to mimicry and authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHello {
    /// `client_version` from the handshake body
    pub version: u16,
    /// 32-byte random field; carries `iv || ciphertext` for covert clients
    pub random: [u8; RANDOM_SIZE],
    /// Legacy session id (0..=32 bytes)
    pub session_id: Vec<u8>,
    /// Offered cipher suites, in client preference order
    pub cipher_suites: Vec<u16>,
    /// Offered compression methods
    pub compression_methods: Vec<u8>,
    /// Extensions in wire order
    pub extensions: Vec<Extension>,
}

impl ClientHello {
    /// Body of the first extension with the given type.
    pub fn extension(&self, ext_type: ExtensionType) -> Option<&[u8]> {
        self.extensions
            .iter()
            .find(|ext| ext.ext_type == ext_type as u16)
            .map(|ext| ext.data.as_slice())
    }

    /// Host name from the server_name extension, if present and well formed.
    pub fn server_name(&self) -> Option<&str> {
        let data = self.extension(ExtensionType::ServerName)?;
        let mut list = Cursor::new(data);
        let mut entries = Cursor::new(list.vec16().ok()?);
        while !entries.is_empty() {
            let name_type = entries.u8().ok()?;
            let name = entries.vec16().ok()?;
            if name_type == 0 {
                return std::str::from_utf8(name).ok();
            }
        }
        None
    }
}

/// Parse a TLS record containing a ClientHello.
///
/// Fails with [`Error::MalformedHandshake`] on any truncation, inconsistent
/// length, or unexpected content/handshake type. Bytes after the first
/// record are ignored.
pub fn parse_client_hello(data: &[u8]) -> Result<ClientHello> {
    let mut record = Cursor::new(data);
    let content_type = record.u8()?;
    if content_type != ContentType::Handshake as u8 {
        return Err(Error::malformed("not a handshake record"));
    }
    let _record_version = record.u16()?;
    let fragment = record.vec16()?;

    let mut handshake = Cursor::new(fragment);
    if handshake.u8()? != HandshakeType::ClientHello as u8 {
        return Err(Error::malformed("not a ClientHello"));
    }
    let body_len = handshake.u24()?;
    let mut body = Cursor::new(handshake.take(body_len)?);

    let version = body.u16()?;

    let mut random = [0u8; RANDOM_SIZE];
    random.copy_from_slice(body.take(RANDOM_SIZE)?);

    let session_id = body.vec8()?;
    if session_id.len() > 32 {
        return Err(Error::malformed("session id longer than 32 bytes"));
    }

    let suites = body.vec16()?;
    if suites.is_empty() || suites.len() % 2 != 0 {
        return Err(Error::malformed("bad cipher suite list length"));
    }
    let cipher_suites = suites
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();

    let compression_methods = body.vec8()?;
    if compression_methods.is_empty() {
        return Err(Error::malformed("empty compression method list"));
    }

    // Extensions are optional, but if the block is present it must be exact
    let mut extensions = Vec::new();
    if !body.is_empty() {
        let mut block = Cursor::new(body.vec16()?);
        while !block.is_empty() {
            let ext_type = block.u16()?;
            let data = block.vec16()?.to_vec();
            extensions.push(Extension { ext_type, data });
        }
        if !body.is_empty() {
            return Err(Error::malformed("trailing bytes after extensions"));
        }
    }

    Ok(ClientHello {
        version,
        random,
        session_id: session_id.to_vec(),
        cipher_suites,
        compression_methods: compression_methods.to_vec(),
        extensions,
    })
}

/// Bounds-checked reader over a byte slice.
struct Cursor<'a> {
    buf: &'a [u8],
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.buf.len() < n {
            return Err(Error::malformed(format!(
                "need {} bytes, {} remain",
                n,
                self.buf.len()
            )));
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u24(&mut self) -> Result<usize> {
        let b = self.take(3)?;
        Ok(((b[0] as usize) << 16) | ((b[1] as usize) << 8) | b[2] as usize)
    }

    fn vec8(&mut self) -> Result<&'a [u8]> {
        let len = self.u8()? as usize;
        self.take(len)
    }

    fn vec16(&mut self) -> Result<&'a [u8]> {
        let len = self.u16()? as usize;
        self.take(len)
    }
}

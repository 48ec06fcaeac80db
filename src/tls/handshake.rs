//! Construction of the mimicked TLS 1.2 handshake.
//!
//! The exchange looks like an abbreviated (ticket-resumed) TLS 1.2 session:
//!
//! ```text
//! Client                                   Server
//!   ClientHello (random = iv || token)  -->
//!                                       <--  ServerHello
//!                                       <--  ChangeCipherSpec
//!                                       <--  Finished
//!   ChangeCipherSpec                    -->
//!   Finished                            -->
//!   ========== application_data records ==========
//! ```
//!
//! None of these messages carry real key material.

use bytes::{BufMut, BytesMut};
use sha2::{Digest, Sha256};

use crate::crypto::{entropy, RANDOM_SIZE};
use crate::tls::{
    ClientHello, ContentType, ExtensionType, HandshakeType, RECORD_HEADER_LEN, VERSION_TLS10,
    VERSION_TLS12,
};

/// Size of the opaque session ticket offered by the client.
pub const TICKET_LEN: usize = 192;

/// Longest host name accepted for the server_name extension (DNS limit).
pub const MAX_SERVER_NAME_LEN: usize = 255;

/// Size of the fake encrypted Finished message (explicit nonce + body + GCM tag).
pub const FINISHED_LEN: usize = 40;

/// Cipher suites offered by the client, in a mainstream browser order.
const CLIENT_CIPHER_SUITES: [u16; 13] = [
    0xc02b, // TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256
    0xc02f, // TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256
    0xc02c, // TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384
    0xc030, // TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384
    0xcca9, // TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256
    0xcca8, // TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256
    0xc013, // TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA
    0xc014, // TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA
    0x009c, // TLS_RSA_WITH_AES_128_GCM_SHA256
    0x009d, // TLS_RSA_WITH_AES_256_GCM_SHA384
    0x002f, // TLS_RSA_WITH_AES_128_CBC_SHA
    0x0035, // TLS_RSA_WITH_AES_256_CBC_SHA
    0x000a, // TLS_RSA_WITH_3DES_EDE_CBC_SHA
];

/// Suites the server picks from, most preferred first.
const SERVER_PREFERENCE: [u16; 4] = [0xc030, 0xc02f, 0xc02c, 0xc02b];

const SIGNATURE_ALGORITHMS: [u16; 9] = [
    0x0403, // ecdsa_secp256r1_sha256
    0x0804, // rsa_pss_rsae_sha256
    0x0401, // rsa_pkcs1_sha256
    0x0503, // ecdsa_secp384r1_sha384
    0x0805, // rsa_pss_rsae_sha384
    0x0501, // rsa_pkcs1_sha384
    0x0806, // rsa_pss_rsae_sha512
    0x0601, // rsa_pkcs1_sha512
    0x0201, // rsa_pkcs1_sha1
];

const SUPPORTED_GROUPS: [u16; 3] = [
    0x001d, // x25519
    0x0017, // secp256r1
    0x0018, // secp384r1
];

const ALPN_PROTOCOLS: [&str; 2] = ["h2", "http/1.1"];

/// Builder for the covert ClientHello record.
#[derive(Debug, Clone)]
pub struct ClientHelloBuilder {
    /// Host name placed in the server_name extension
    server_name: String,
    /// Lifetime hint written at the head of the session ticket
    ticket_time_hint: u32,
    /// Process-wide randomizer mixed into the ticket bytes
    opaque: u32,
}

impl ClientHelloBuilder {
    /// Create a builder.
    ///
    /// # Arguments
    ///
    /// * `server_name` - cover host name for SNI
    /// * `ticket_time_hint` - seconds, written into the session ticket
    /// * `opaque` - randomizer chosen once per process
    pub fn new(server_name: impl Into<String>, ticket_time_hint: u32, opaque: u32) -> Self {
        Self {
            server_name: server_name.into(),
            ticket_time_hint,
            opaque,
        }
    }

    /// Build the complete ClientHello record around the given random field.
    pub fn build(&self, random: &[u8; RANDOM_SIZE]) -> Vec<u8> {
        let mut body = BytesMut::with_capacity(512);

        // client_version
        body.put_slice(&VERSION_TLS12);

        // Random field with the embedded credential
        body.put_slice(random);

        // A resuming client presents a 32-byte session id
        let session_id: [u8; 32] = entropy::array();
        body.put_u8(session_id.len() as u8);
        body.put_slice(&session_id);

        body.put_u16((CLIENT_CIPHER_SUITES.len() * 2) as u16);
        for suite in CLIENT_CIPHER_SUITES {
            body.put_u16(suite);
        }

        // Compression methods (null only)
        body.put_u8(1);
        body.put_u8(0);

        let extensions = self.build_extensions();
        body.put_u16(extensions.len() as u16);
        body.put_slice(&extensions);

        handshake_record(VERSION_TLS10, HandshakeType::ClientHello, &body)
    }

    fn build_extensions(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(384);

        put_extension(&mut buf, ExtensionType::RenegotiationInfo, &[0x00]);
        self.write_sni_extension(&mut buf);
        put_extension(&mut buf, ExtensionType::ExtendedMasterSecret, &[]);
        put_extension(&mut buf, ExtensionType::SessionTicket, &self.session_ticket());
        write_u16_list_extension(
            &mut buf,
            ExtensionType::SignatureAlgorithms,
            &SIGNATURE_ALGORITHMS,
        );
        // OCSP status request, no responder ids or extensions
        put_extension(&mut buf, ExtensionType::StatusRequest, &[0x01, 0x00, 0x00, 0x00, 0x00]);
        put_extension(&mut buf, ExtensionType::SignedCertificateTimestamp, &[]);
        write_alpn_extension(&mut buf);
        put_extension(&mut buf, ExtensionType::EcPointFormats, &[0x01, 0x00]);
        write_u16_list_extension(&mut buf, ExtensionType::SupportedGroups, &SUPPORTED_GROUPS);

        buf
    }

    fn write_sni_extension(&self, buf: &mut BytesMut) {
        let sni_bytes = self.server_name.as_bytes();
        debug_assert!(sni_bytes.len() <= MAX_SERVER_NAME_LEN);
        let entry_len = 3 + sni_bytes.len(); // type(1) + len(2) + name

        let mut data = BytesMut::with_capacity(2 + entry_len);
        data.put_u16(entry_len as u16);
        data.put_u8(0); // Host name type
        data.put_u16(sni_bytes.len() as u16);
        data.put_slice(sni_bytes);

        put_extension(buf, ExtensionType::ServerName, &data);
    }

    /// Opaque session ticket: lifetime hint followed by hash-chained filler.
    ///
    /// The filler is seeded with the process opaque value and a per-call
    /// nonce so no two hellos carry the same ticket.
    fn session_ticket(&self) -> Vec<u8> {
        let mut ticket = Vec::with_capacity(TICKET_LEN);
        ticket.extend_from_slice(&self.ticket_time_hint.to_be_bytes());

        let nonce: [u8; 16] = entropy::array();
        let mut block = Sha256::new()
            .chain_update(self.opaque.to_be_bytes())
            .chain_update(nonce)
            .finalize();

        while ticket.len() < TICKET_LEN {
            let take = (TICKET_LEN - ticket.len()).min(block.len());
            ticket.extend_from_slice(&block[..take]);
            block = Sha256::digest(block);
        }
        ticket
    }
}

/// The client's closing flight: ChangeCipherSpec followed by Finished.
pub fn client_reply() -> Vec<u8> {
    let mut out = change_cipher_spec();
    out.extend_from_slice(&finished());
    out
}

/// The server's flight answering an authenticated ClientHello.
///
/// Three records: ServerHello, ChangeCipherSpec and Finished. The ServerHello
/// echoes the client's session id, as a server resuming a session would.
pub fn server_reply(hello: &ClientHello) -> Vec<u8> {
    let mut body = BytesMut::with_capacity(96);

    body.put_slice(&VERSION_TLS12);

    let server_random: [u8; RANDOM_SIZE] = entropy::array();
    body.put_slice(&server_random);

    body.put_u8(hello.session_id.len() as u8);
    body.put_slice(&hello.session_id);

    body.put_u16(choose_cipher_suite(hello));

    // Compression method
    body.put_u8(0);

    let mut extensions = BytesMut::with_capacity(16);
    put_extension(&mut extensions, ExtensionType::RenegotiationInfo, &[0x00]);
    if hello.extension(ExtensionType::ExtendedMasterSecret).is_some() {
        put_extension(&mut extensions, ExtensionType::ExtendedMasterSecret, &[]);
    }
    if hello.extension(ExtensionType::EcPointFormats).is_some() {
        put_extension(&mut extensions, ExtensionType::EcPointFormats, &[0x01, 0x00]);
    }
    // Empty ack: the ticket was accepted and no new one follows
    if hello.extension(ExtensionType::SessionTicket).is_some() {
        put_extension(&mut extensions, ExtensionType::SessionTicket, &[]);
    }
    body.put_u16(extensions.len() as u16);
    body.put_slice(&extensions);

    let mut out = handshake_record(VERSION_TLS12, HandshakeType::ServerHello, &body);
    out.extend_from_slice(&change_cipher_spec());
    out.extend_from_slice(&finished());
    out
}

fn choose_cipher_suite(hello: &ClientHello) -> u16 {
    SERVER_PREFERENCE
        .iter()
        .copied()
        .find(|suite| hello.cipher_suites.contains(suite))
        .or_else(|| hello.cipher_suites.first().copied())
        .unwrap_or(SERVER_PREFERENCE[0])
}

fn change_cipher_spec() -> Vec<u8> {
    vec![ContentType::ChangeCipherSpec as u8, 0x03, 0x03, 0x00, 0x01, 0x01]
}

/// A Finished record whose body is random, like an AEAD-sealed one.
fn finished() -> Vec<u8> {
    let mut record = vec![0u8; RECORD_HEADER_LEN + FINISHED_LEN];
    record[0] = ContentType::Handshake as u8;
    record[1..3].copy_from_slice(&VERSION_TLS12);
    record[3..5].copy_from_slice(&(FINISHED_LEN as u16).to_be_bytes());
    entropy::fill(&mut record[RECORD_HEADER_LEN..]);
    record
}

/// Wrap a handshake body in its 4-byte handshake header and a record header.
fn handshake_record(record_version: [u8; 2], msg_type: HandshakeType, body: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(RECORD_HEADER_LEN + 4 + body.len());

    // TLS record layer
    buf.put_u8(ContentType::Handshake as u8);
    buf.put_slice(&record_version);
    buf.put_u16((4 + body.len()) as u16);

    // Handshake header with 3-byte length
    buf.put_u8(msg_type as u8);
    let len = body.len() as u32;
    buf.put_slice(&len.to_be_bytes()[1..]);
    buf.put_slice(body);

    buf.to_vec()
}

fn put_extension(buf: &mut BytesMut, ext_type: ExtensionType, data: &[u8]) {
    buf.put_u16(ext_type as u16);
    buf.put_u16(data.len() as u16);
    buf.put_slice(data);
}

fn write_u16_list_extension(buf: &mut BytesMut, ext_type: ExtensionType, values: &[u16]) {
    let mut data = BytesMut::with_capacity(2 + values.len() * 2);
    data.put_u16((values.len() * 2) as u16);
    for value in values {
        data.put_u16(*value);
    }
    put_extension(buf, ext_type, &data);
}

fn write_alpn_extension(buf: &mut BytesMut) {
    let mut list = BytesMut::new();
    for proto in ALPN_PROTOCOLS {
        list.put_u8(proto.len() as u8);
        list.put_slice(proto.as_bytes());
    }

    let mut data = BytesMut::with_capacity(2 + list.len());
    data.put_u16(list.len() as u16);
    data.put_slice(&list);
    put_extension(buf, ExtensionType::ApplicationLayerProtocolNegotiation, &data);
}

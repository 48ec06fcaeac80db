//! TLS 1.2 wire structures used for mimicry.
//!
//! Only the subset needed to look like an abbreviated TLS 1.2 session is
//! implemented: the 5-byte record header, ClientHello parsing, and
//! construction of the handshake messages each side sends. No real key
//! exchange happens; application records carry the raw tunnel bytes.

mod handshake;
mod hello;
mod record;

pub use handshake::{client_reply, server_reply, ClientHelloBuilder, MAX_SERVER_NAME_LEN};
pub use hello::{parse_client_hello, ClientHello, Extension};
pub use record::{add_header, peel_header, read_record, write_header};

/// Length of a TLS record header (type, version, length).
pub const RECORD_HEADER_LEN: usize = 5;

/// Largest record payload permitted by TLS (2^14).
pub const MAX_PAYLOAD: usize = 16384;

/// Largest complete record: header plus maximum payload.
pub const MAX_RECORD_LEN: usize = RECORD_HEADER_LEN + MAX_PAYLOAD;

/// TLS 1.2 protocol version.
pub const VERSION_TLS12: [u8; 2] = [0x03, 0x03];

/// TLS 1.0 version, used by browsers on the ClientHello record header.
pub const VERSION_TLS10: [u8; 2] = [0x03, 0x01];

/// TLS record types
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContentType {
    /// change_cipher_spec(20)
    ChangeCipherSpec = 20,
    /// handshake(22)
    Handshake = 22,
    /// application_data(23)
    ApplicationData = 23,
}

impl From<ContentType> for u8 {
    fn from(value: ContentType) -> Self {
        value as u8
    }
}

/// TLS handshake types
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandshakeType {
    /// client_hello(1)
    ClientHello = 1,
    /// server_hello(2)
    ServerHello = 2,
}

/// TLS extension types
#[repr(u16)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExtensionType {
    /// server_name(0)
    ServerName = 0x0000,
    /// status_request(5)
    StatusRequest = 0x0005,
    /// supported_groups(10)
    SupportedGroups = 0x000a,
    /// ec_point_formats(11)
    EcPointFormats = 0x000b,
    /// signature_algorithms(13)
    SignatureAlgorithms = 0x000d,
    /// application_layer_protocol_negotiation(16)
    ApplicationLayerProtocolNegotiation = 0x0010,
    /// signed_certificate_timestamp(18)
    SignedCertificateTimestamp = 0x0012,
    /// extended_master_secret(23)
    ExtendedMasterSecret = 0x0017,
    /// session_ticket(35)
    SessionTicket = 0x0023,
    /// renegotiation_info(65281)
    RenegotiationInfo = 0xff01,
}

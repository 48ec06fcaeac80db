//! Cryptographic primitives for the covert handshake.
//!
//! This module provides:
//! - SHA-256 derivation of the AES-256 key from the shared secret
//! - The 12-hour Time Window Token and its AES-256-CFB embedding
//! - OS entropy for IVs and other random-looking fields
//!
//! All secret material is zeroized on drop to prevent memory leakage.

pub mod entropy;
mod keys;
pub mod token;

pub use keys::SharedKey;
pub use token::{Authenticator, Token, WindowPolicy};

/// Size of the derived symmetric key in bytes (AES-256)
pub const KEY_SIZE: usize = 32;

/// Size of the CFB initialisation vector in bytes
pub const IV_SIZE: usize = 16;

/// Size of the Time Window Token in bytes
pub const TOKEN_SIZE: usize = 16;

/// Size of the ClientHello random field carrying `iv || ciphertext`
pub const RANDOM_SIZE: usize = IV_SIZE + TOKEN_SIZE;

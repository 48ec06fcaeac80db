//! Shared secret and its derived AES-256 key.
//!
//! Client and server are configured with the same secret string. The
//! symmetric key is its SHA-256 digest, computed once at startup and
//! shared read-only by every connection worker afterwards.

use std::fmt;

use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::KEY_SIZE;

/// The configured secret together with its derived symmetric key.
///
/// Both halves are zeroized when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SharedKey {
    secret: String,
    key: [u8; KEY_SIZE],
}

impl SharedKey {
    /// Derive the symmetric key from a secret string.
    pub fn derive(secret: impl Into<String>) -> Self {
        let secret = secret.into();
        let key = Self::hash(&secret);
        Self { secret, key }
    }

    fn hash(secret: &str) -> [u8; KEY_SIZE] {
        let mut hasher = Sha256::new();
        hasher.update(secret.as_bytes());
        hasher.finalize().into()
    }

    /// The secret string as configured.
    ///
    /// # Security
    ///
    /// Handle with care - this is secret key material.
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// The derived AES-256 key bytes.
    pub fn key(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }

    /// Short, non-reversible fingerprint suitable for logs.
    ///
    /// Lets operators confirm that both ends share a secret without
    /// printing the key itself.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.key);
        hex::encode(&digest[..4])
    }
}

impl fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedKey")
            .field("fingerprint", &self.fingerprint())
            .finish_non_exhaustive()
    }
}

impl PartialEq for SharedKey {
    fn eq(&self, other: &Self) -> bool {
        use subtle::ConstantTimeEq;
        bool::from(self.key[..].ct_eq(&other.key[..]))
    }
}

impl Eq for SharedKey {}

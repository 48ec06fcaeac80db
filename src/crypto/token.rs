//! Time-windowed covert credential.
//!
//! A client proves knowledge of the shared secret by filling the 32-byte
//! ClientHello random field with `iv || AES-256-CFB(key, iv, token)`, where
//! `token` is the first 16 bytes of `SHA-256(window || secret)` and
//! `window = floor(unix_time / 12h)` rendered as a decimal string.
//!
//! Without the key the field is indistinguishable from the random bytes a
//! real browser would send.

use std::sync::Arc;

use aes::Aes256;
use cfb_mode::cipher::generic_array::GenericArray;
use cfb_mode::cipher::{AsyncStreamCipher, KeyIvInit};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::clock::Clock;
use crate::crypto::{entropy, SharedKey, IV_SIZE, KEY_SIZE, RANDOM_SIZE, TOKEN_SIZE};
use crate::error::{Error, Result};

type Aes256CfbEnc = cfb_mode::Encryptor<Aes256>;
type Aes256CfbDec = cfb_mode::Decryptor<Aes256>;

/// Length of one credential window in seconds (12 hours).
pub const WINDOW_SECS: i64 = 12 * 60 * 60;

/// A Time Window Token.
pub type Token = [u8; TOKEN_SIZE];

/// Which credential windows the server accepts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WindowPolicy {
    /// Only the window containing "now".
    #[default]
    CurrentOnly,
    /// The current window and the one immediately before it, absorbing
    /// clock skew right after a boundary.
    AllowPrevious,
}

/// Index of the credential window containing `now`.
pub fn window_index(now: DateTime<Utc>) -> i64 {
    now.timestamp().div_euclid(WINDOW_SECS)
}

/// Token for an explicit window index.
pub fn token_for_window(window: i64, secret: &str) -> Token {
    let mut hasher = Sha256::new();
    hasher.update(window.to_string().as_bytes());
    hasher.update(secret.as_bytes());
    let digest = hasher.finalize();

    let mut token = [0u8; TOKEN_SIZE];
    token.copy_from_slice(&digest[..TOKEN_SIZE]);
    token
}

/// Token for the window containing `now`.
pub fn compute_token(now: DateTime<Utc>, secret: &str) -> Token {
    token_for_window(window_index(now), secret)
}

/// Encrypt a token under a fresh random IV.
///
/// Returns `iv || ciphertext`, exactly the size of the ClientHello random field.
pub fn embed_token(token: &Token, key: &[u8; KEY_SIZE]) -> [u8; RANDOM_SIZE] {
    let iv: [u8; IV_SIZE] = entropy::array();
    embed_token_with_iv(token, key, &iv)
}

/// Encrypt a token under the given IV.
pub fn embed_token_with_iv(
    token: &Token,
    key: &[u8; KEY_SIZE],
    iv: &[u8; IV_SIZE],
) -> [u8; RANDOM_SIZE] {
    let mut ciphertext = *token;
    Aes256CfbEnc::new(GenericArray::from_slice(key), GenericArray::from_slice(iv))
        .encrypt(&mut ciphertext);

    let mut random = [0u8; RANDOM_SIZE];
    random[..IV_SIZE].copy_from_slice(iv);
    random[IV_SIZE..].copy_from_slice(&ciphertext);
    random
}

/// Decrypt whatever sits in the random field.
///
/// Always succeeds; for genuine browser traffic the result is noise.
pub fn extract_token(random: &[u8; RANDOM_SIZE], key: &[u8; KEY_SIZE]) -> Token {
    let (iv, ciphertext) = random.split_at(IV_SIZE);

    let mut plaintext = [0u8; TOKEN_SIZE];
    plaintext.copy_from_slice(ciphertext);
    Aes256CfbDec::new(GenericArray::from_slice(key), GenericArray::from_slice(iv))
        .decrypt(&mut plaintext);
    plaintext
}

/// Check a ClientHello random field against the window containing `now`.
///
/// Never fails; any mismatch is simply `false`.
pub fn verify(
    random: &[u8; RANDOM_SIZE],
    key: &SharedKey,
    now: DateTime<Utc>,
    policy: WindowPolicy,
) -> bool {
    let candidate = extract_token(random, key.key());
    let window = window_index(now);

    let current = token_for_window(window, key.secret());
    let mut ok = candidate[..].ct_eq(&current[..]);

    if policy == WindowPolicy::AllowPrevious {
        let previous = token_for_window(window - 1, key.secret());
        ok |= candidate[..].ct_eq(&previous[..]);
    }

    bool::from(ok)
}

/// Issues and checks covert credentials against an injected clock.
#[derive(Clone)]
pub struct Authenticator {
    key: SharedKey,
    clock: Arc<dyn Clock>,
    policy: WindowPolicy,
}

impl Authenticator {
    /// Create an authenticator for the given key, clock and window policy.
    pub fn new(key: SharedKey, clock: Arc<dyn Clock>, policy: WindowPolicy) -> Self {
        Self { key, clock, policy }
    }

    /// Fresh ClientHello random field carrying the current-window token.
    pub fn client_random(&self) -> [u8; RANDOM_SIZE] {
        let token = compute_token(self.clock.now(), self.key.secret());
        embed_token(&token, self.key.key())
    }

    /// Whether the random field carries a valid credential.
    pub fn verify(&self, random: &[u8; RANDOM_SIZE]) -> bool {
        verify(random, &self.key, self.clock.now(), self.policy)
    }

    /// Like [`Authenticator::verify`], as a `Result` for `?` chains.
    pub fn check(&self, random: &[u8; RANDOM_SIZE]) -> Result<()> {
        if self.verify(random) {
            Ok(())
        } else {
            Err(Error::AuthFailed)
        }
    }
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("key", &self.key)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;

    const T0: i64 = 1_700_000_000;

    fn at(secs: i64) -> DateTime<Utc> {
        FixedClock::from_unix(secs).now()
    }

    #[test]
    fn test_window_index() {
        assert_eq!(window_index(at(0)), 0);
        assert_eq!(window_index(at(WINDOW_SECS - 1)), 0);
        assert_eq!(window_index(at(WINDOW_SECS)), 1);
        assert_eq!(window_index(at(T0)), T0 / WINDOW_SECS);
    }

    #[test]
    fn test_token_matches_decimal_window_then_secret() {
        let token = token_for_window(39351, "test");
        let digest = Sha256::digest(b"39351test");
        assert_eq!(&token[..], &digest[..TOKEN_SIZE]);
    }

    #[test]
    fn test_token_stable_within_window() {
        let start = window_index(at(T0)) * WINDOW_SECS;
        let a = compute_token(at(start), "secret");
        let b = compute_token(at(start + WINDOW_SECS - 1), "secret");
        let c = compute_token(at(start + WINDOW_SECS), "secret");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_embed_then_verify() {
        for secret in ["test", "a much longer shared secret string", ""] {
            let key = SharedKey::derive(secret);
            let token = compute_token(at(T0), secret);
            let random = embed_token(&token, key.key());
            assert!(verify(&random, &key, at(T0), WindowPolicy::CurrentOnly));
        }
    }

    #[test]
    fn test_embed_uses_fresh_iv() {
        let key = SharedKey::derive("test");
        let token = compute_token(at(T0), "test");
        let a = embed_token(&token, key.key());
        let b = embed_token(&token, key.key());
        assert_ne!(a, b);
        assert_eq!(extract_token(&a, key.key()), extract_token(&b, key.key()));
    }

    #[test]
    fn test_cfb_single_block_vector() {
        // AES-256-CFB128 over one block is AES_k(iv) XOR plaintext, so an
        // all-zero token decrypts back to zero under any key/iv pair.
        let key = [0x11u8; KEY_SIZE];
        let iv = [0x22u8; IV_SIZE];
        let random = embed_token_with_iv(&[0u8; TOKEN_SIZE], &key, &iv);
        assert_eq!(&random[..IV_SIZE], &iv);
        assert_ne!(&random[IV_SIZE..], &[0u8; TOKEN_SIZE]);
        assert_eq!(extract_token(&random, &key), [0u8; TOKEN_SIZE]);
    }

    #[test]
    fn test_unrelated_random_rejected() {
        let key = SharedKey::derive("test");
        let fixed = [
            [0u8; RANDOM_SIZE],
            [0xffu8; RANDOM_SIZE],
            *b"0123456789abcdef0123456789abcdef",
        ];
        for random in fixed {
            assert!(!verify(&random, &key, at(T0), WindowPolicy::AllowPrevious));
        }
        for _ in 0..64 {
            let random: [u8; RANDOM_SIZE] = entropy::array();
            assert!(!verify(&random, &key, at(T0), WindowPolicy::CurrentOnly));
        }
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let client = SharedKey::derive("alpha");
        let server = SharedKey::derive("bravo");
        let random = embed_token(&compute_token(at(T0), "alpha"), client.key());
        assert!(!verify(&random, &server, at(T0), WindowPolicy::CurrentOnly));
    }

    #[test]
    fn test_adjacent_windows_rejected() {
        let key = SharedKey::derive("test");
        let window = window_index(at(T0));
        let random = embed_token(&token_for_window(window, "test"), key.key());

        let next = at((window + 1) * WINDOW_SECS);
        let prev = at((window - 1) * WINDOW_SECS);
        assert!(!verify(&random, &key, next, WindowPolicy::CurrentOnly));
        assert!(!verify(&random, &key, prev, WindowPolicy::CurrentOnly));
        assert!(!verify(&random, &key, prev, WindowPolicy::AllowPrevious));
    }

    #[test]
    fn test_allow_previous_window() {
        let key = SharedKey::derive("test");
        let window = window_index(at(T0));
        let random = embed_token(&token_for_window(window, "test"), key.key());

        let one_later = at((window + 1) * WINDOW_SECS + 5);
        let two_later = at((window + 2) * WINDOW_SECS + 5);
        assert!(verify(&random, &key, one_later, WindowPolicy::AllowPrevious));
        assert!(!verify(&random, &key, two_later, WindowPolicy::AllowPrevious));
    }

    #[test]
    fn test_authenticator_round_trip() {
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::from_unix(T0));
        let policy = WindowPolicy::CurrentOnly;
        let client = Authenticator::new(SharedKey::derive("k"), clock.clone(), policy);
        let server = Authenticator::new(SharedKey::derive("k"), clock, policy);

        let random = client.client_random();
        assert!(server.verify(&random));
        assert!(server.check(&random).is_ok());
        assert!(matches!(server.check(&[7u8; RANDOM_SIZE]), Err(Error::AuthFailed)));
    }
}

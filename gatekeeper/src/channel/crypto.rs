//! Timestamped authenticated encryption for keymaster messages.
//!
//! # Token Layout
//!
//! ```text
//! base64url( version:1 | created_at:8 (u64 BE, unix seconds) | nonce:24 | ciphertext+tag )
//! ```
//!
//! - **Encryption**: XChaCha20-Poly1305 with a random 24-byte nonce
//! - **Associated data**: the version byte and the creation timestamp, so the
//!   timestamp cannot be rewritten without failing authentication
//!
//! # Freshness
//!
//! A token is accepted only while `now - created_at <= ttl`, and never when it
//! claims to be more than [`MAX_CLOCK_SKEW_SECS`] in the future. Both hosts must
//! keep their clocks in sync: a keymaster running fast produces tokens the
//! gatekeeper rejects as "from the future", and one running slow shortens the
//! effective window.

use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use chacha20poly1305::{
    aead::{Aead, Payload},
    Key, KeyInit, XChaCha20Poly1305, XNonce,
};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::ConfigurationError;

// =============================================================================
// Constants
// =============================================================================

/// Token format version
pub const TOKEN_VERSION: u8 = 0x01;

/// Channel key length (32 bytes)
pub const KEY_LEN: usize = 32;

/// Nonce length for XChaCha20-Poly1305 (24 bytes)
pub const NONCE_LEN: usize = 24;

/// Poly1305 auth tag length (16 bytes)
pub const AUTH_TAG_LEN: usize = 16;

/// How far in the future a token timestamp may be before it is refused
pub const MAX_CLOCK_SKEW_SECS: u64 = 60;

const HEADER_LEN: usize = 1 + 8;

// =============================================================================
// Errors
// =============================================================================

/// The AEAD refused to seal a message (only possible for absurdly large input).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Encryption failed for a {len}-byte message")]
pub struct EncryptError {
    pub len: usize,
}

/// Why a token could not be opened.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecryptError {
    /// Not base64 or too short to hold a header, nonce and tag
    #[error("Malformed token: {0}")]
    Malformed(String),

    #[error("Unsupported token version: {0:#04x}")]
    UnsupportedVersion(u8),

    /// Authentication failed: wrong key, or the token was altered
    #[error("Invalid token (forged or corrupt)")]
    Forged,

    #[error("Token expired: {age_secs}s old, window is {ttl_secs}s")]
    Expired { age_secs: u64, ttl_secs: u64 },

    #[error("Token created {ahead_secs}s in the future; check the sender's clock")]
    FromTheFuture { ahead_secs: u64 },

    #[error("Decrypted message is not valid UTF-8")]
    NotUtf8,
}

// =============================================================================
// Key
// =============================================================================

/// Shared secret between gatekeeper and keymaster.
///
/// Encoded as URL-safe base64 (44 characters with padding). Wiped from memory
/// when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ChannelKey([u8; KEY_LEN]);

impl ChannelKey {
    /// Generate a fresh random key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Parse an encoded key, failing on anything that is not exactly 32 bytes.
    pub fn from_base64(encoded: &str) -> Result<Self, ConfigurationError> {
        let trimmed = encoded.trim();
        if trimmed.is_empty() {
            return Err(ConfigurationError::MissingKey);
        }

        let mut decoded = URL_SAFE
            .decode(trimmed)
            .map_err(|e| ConfigurationError::MalformedKey(format!("not URL-safe base64: {e}")))?;

        if decoded.len() != KEY_LEN {
            let len = decoded.len();
            decoded.zeroize();
            return Err(ConfigurationError::MalformedKey(format!(
                "expected {KEY_LEN} bytes, got {len}"
            )));
        }

        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&decoded);
        decoded.zeroize();
        Ok(Self(key))
    }

    /// Encode for configuration files and environment variables.
    pub fn to_base64(&self) -> String {
        URL_SAFE.encode(self.0)
    }
}

impl std::fmt::Debug for ChannelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ChannelKey(..)")
    }
}

// =============================================================================
// Cipher
// =============================================================================

/// Encrypts and opens timestamped tokens under one key and freshness window.
#[derive(Clone)]
pub struct MessageCipher {
    cipher: XChaCha20Poly1305,
    ttl: Duration,
}

impl MessageCipher {
    pub fn new(key: &ChannelKey, ttl: Duration) -> Self {
        Self {
            cipher: XChaCha20Poly1305::new(Key::from_slice(&key.0)),
            ttl,
        }
    }

    /// The freshness window.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Encrypt `plaintext`, stamped with the current time.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String, EncryptError> {
        self.encrypt_at(plaintext, unix_now())
    }

    /// Encrypt `plaintext`, stamped with `created_at` (unix seconds).
    pub fn encrypt_at(&self, plaintext: &[u8], created_at: u64) -> Result<String, EncryptError> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let header = header(created_at);
        let ciphertext = self
            .cipher
            .encrypt(
                XNonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: &header,
                },
            )
            .map_err(|_| EncryptError {
                len: plaintext.len(),
            })?;

        let mut token = Vec::with_capacity(HEADER_LEN + NONCE_LEN + ciphertext.len());
        token.extend_from_slice(&header);
        token.extend_from_slice(&nonce);
        token.extend_from_slice(&ciphertext);
        Ok(URL_SAFE.encode(token))
    }

    /// Open a token, enforcing the freshness window against the current time.
    pub fn decrypt(&self, token: &str) -> Result<Vec<u8>, DecryptError> {
        self.decrypt_at(token, unix_now())
    }

    /// Open a token as if the current time were `now` (unix seconds).
    pub fn decrypt_at(&self, token: &str, now: u64) -> Result<Vec<u8>, DecryptError> {
        let raw = URL_SAFE
            .decode(token.trim())
            .map_err(|e| DecryptError::Malformed(e.to_string()))?;

        if raw.len() < HEADER_LEN + NONCE_LEN + AUTH_TAG_LEN {
            return Err(DecryptError::Malformed(format!(
                "token is {} bytes, shorter than the minimum {}",
                raw.len(),
                HEADER_LEN + NONCE_LEN + AUTH_TAG_LEN
            )));
        }

        if raw[0] != TOKEN_VERSION {
            return Err(DecryptError::UnsupportedVersion(raw[0]));
        }

        let (header, rest) = raw.split_at(HEADER_LEN);
        let (nonce, ciphertext) = rest.split_at(NONCE_LEN);

        let plaintext = self
            .cipher
            .decrypt(
                XNonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: header,
                },
            )
            .map_err(|_| DecryptError::Forged)?;

        let mut stamp = [0u8; 8];
        stamp.copy_from_slice(&header[1..HEADER_LEN]);
        let created_at = u64::from_be_bytes(stamp);

        if created_at > now + MAX_CLOCK_SKEW_SECS {
            return Err(DecryptError::FromTheFuture {
                ahead_secs: created_at - now,
            });
        }

        let age_secs = now.saturating_sub(created_at);
        if age_secs > self.ttl.as_secs() {
            return Err(DecryptError::Expired {
                age_secs,
                ttl_secs: self.ttl.as_secs(),
            });
        }

        Ok(plaintext)
    }

    /// Open a token and require the plaintext to be UTF-8.
    pub fn decrypt_text(&self, token: &str) -> Result<String, DecryptError> {
        let bytes = self.decrypt(token)?;
        String::from_utf8(bytes).map_err(|_| DecryptError::NotUtf8)
    }
}

fn header(created_at: u64) -> [u8; HEADER_LEN] {
    let mut header = [0u8; HEADER_LEN];
    header[0] = TOKEN_VERSION;
    header[1..].copy_from_slice(&created_at.to_be_bytes());
    header
}

fn unix_now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

// =============================================================================
// Tests
// =============================================================================

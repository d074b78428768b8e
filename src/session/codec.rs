//! Authenticated, optionally encrypted cookie values
//!
//! A cookie value has the form `{timestamp}.{payload}.{mac}` where `payload` is
//! the JSON-encoded value map (sealed with ChaCha20-Poly1305 when a block key is
//! configured) and `mac` is HMAC-SHA256 over `name|timestamp|payload`. Both
//! binary parts are unpadded URL-safe base64.

use std::collections::HashMap;
use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::{CookieError, CryptoError};

type HmacSha256 = Hmac<Sha256>;

/// Values carried by a session or encrypted cookie
pub type SessionValues = HashMap<String, String>;

const NONCE_LEN: usize = 12;
const BLOCK_KEY_LEN: usize = 32;

/// Encodes value maps into cookie values and back
pub trait CookieCodec: Send + Sync {
    fn encode(&self, name: &str, values: &SessionValues) -> Result<String, CookieError>;

    /// Fails with a decode error for any value this codec did not produce,
    /// including values produced under another key
    fn decode(&self, name: &str, value: &str) -> Result<SessionValues, CookieError>;
}

/// HMAC-signed cookie codec with optional encryption
#[derive(Clone)]
pub struct SecureCookie {
    signer: HmacSha256,
    cipher: Option<ChaCha20Poly1305>,
    /// Seconds a value stays valid; 0 disables the check
    max_age: i64,
}

impl fmt::Debug for SecureCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureCookie")
            .field("encrypted", &self.cipher.is_some())
            .field("max_age", &self.max_age)
            .finish_non_exhaustive()
    }
}

impl SecureCookie {
    /// Default validity window, 30 days
    pub const DEFAULT_MAX_AGE: i64 = 86400 * 30;

    /// Codec signing with `hash_key` and, if given, encrypting with the
    /// 32-byte `block_key`
    pub fn new(hash_key: &[u8], block_key: Option<&[u8]>) -> Result<Self, CryptoError> {
        if hash_key.is_empty() {
            return Err(CryptoError::InvalidKey(0));
        }
        let cipher = match block_key {
            Some(key) if key.len() == BLOCK_KEY_LEN => {
                Some(ChaCha20Poly1305::new(Key::from_slice(key)))
            }
            Some(key) => return Err(CryptoError::InvalidKey(key.len())),
            None => None,
        };
        let signer = <HmacSha256 as Mac>::new_from_slice(hash_key)
            .map_err(|_| CryptoError::InvalidKey(hash_key.len()))?;
        Ok(Self {
            signer,
            cipher,
            max_age: Self::DEFAULT_MAX_AGE,
        })
    }

    /// Derive independent signing and encryption keys from one secret
    pub fn from_master_key(key: &[u8]) -> Result<Self, CryptoError> {
        if key.is_empty() {
            return Err(CryptoError::InvalidKey(0));
        }
        let hash_key = derive(b"way-cookie-hash", key);
        let block_key = derive(b"way-cookie-block", key);
        Self::new(&hash_key, Some(&block_key))
    }

    #[must_use]
    pub const fn with_max_age(mut self, seconds: i64) -> Self {
        self.max_age = seconds;
        self
    }

    pub const fn max_age(&self) -> i64 {
        self.max_age
    }

    fn mac(&self, name: &str, timestamp: &str, payload: &str) -> HmacSha256 {
        let mut mac = self.signer.clone();
        mac.update(name.as_bytes());
        mac.update(b"|");
        mac.update(timestamp.as_bytes());
        mac.update(b"|");
        mac.update(payload.as_bytes());
        mac
    }

    fn seal(&self, name: &str, plain: Vec<u8>) -> Result<Vec<u8>, CookieError> {
        let Some(cipher) = &self.cipher else {
            return Ok(plain);
        };
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        let sealed = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &plain,
                    aad: name.as_bytes(),
                },
            )
            .map_err(|_| CookieError::Encode {
                name: name.to_string(),
                reason: "encryption failed".to_string(),
            })?;
        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    fn open(&self, name: &str, data: Vec<u8>) -> Result<Vec<u8>, CookieError> {
        let Some(cipher) = &self.cipher else {
            return Ok(data);
        };
        if data.len() < NONCE_LEN {
            return Err(decode_error(name, "payload too short"));
        }
        let (nonce, sealed) = data.split_at(NONCE_LEN);
        cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: sealed,
                    aad: name.as_bytes(),
                },
            )
            .map_err(|_| decode_error(name, "decryption failed"))
    }

    fn encode_at(&self, name: &str, values: &SessionValues, now: i64) -> Result<String, CookieError> {
        let json = serde_json::to_vec(values).map_err(|e| CookieError::Encode {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        let payload = URL_SAFE_NO_PAD.encode(self.seal(name, json)?);
        let timestamp = now.to_string();
        let mac = self.mac(name, &timestamp, &payload).finalize().into_bytes();
        Ok(format!(
            "{timestamp}.{payload}.{}",
            URL_SAFE_NO_PAD.encode(mac)
        ))
    }

    fn decode_at(&self, name: &str, value: &str, now: i64) -> Result<SessionValues, CookieError> {
        let mut parts = value.splitn(3, '.');
        let (Some(timestamp), Some(payload), Some(mac)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(decode_error(name, "malformed value"));
        };

        let mac = URL_SAFE_NO_PAD
            .decode(mac)
            .map_err(|_| decode_error(name, "malformed signature"))?;
        self.mac(name, timestamp, payload)
            .verify_slice(&mac)
            .map_err(|_| decode_error(name, "signature mismatch"))?;

        let issued: i64 = timestamp
            .parse()
            .map_err(|_| decode_error(name, "malformed timestamp"))?;
        if self.max_age > 0 && now.saturating_sub(issued) > self.max_age {
            return Err(CookieError::Expired(name.to_string()));
        }

        let data = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| decode_error(name, "malformed payload"))?;
        let plain = self.open(name, data)?;
        serde_json::from_slice(&plain).map_err(|e| decode_error(name, &e.to_string()))
    }
}

impl CookieCodec for SecureCookie {
    fn encode(&self, name: &str, values: &SessionValues) -> Result<String, CookieError> {
        self.encode_at(name, values, chrono::Utc::now().timestamp())
    }

    fn decode(&self, name: &str, value: &str) -> Result<SessionValues, CookieError> {
        self.decode_at(name, value, chrono::Utc::now().timestamp())
    }
}

fn derive(label: &[u8], key: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(label);
    hasher.update(key);
    hasher.finalize().into()
}

fn decode_error(name: &str, reason: &str) -> CookieError {
    CookieError::Decode {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

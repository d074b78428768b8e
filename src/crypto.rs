//! Hashing and symmetric encryption helpers exposed on the request context

use aes_gcm::aead::consts::U12;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::aes::Aes192;
use aes_gcm::{Aes128Gcm, Aes256Gcm, AesGcm, Nonce};
use rand::RngCore;
use sha3::{Digest, Sha3_256};

use crate::error::CryptoError;

const NONCE_LEN: usize = 12;

type Aes192Gcm = AesGcm<Aes192, U12>;

/// SHA3-256 of `data` as lowercase hex
pub fn hash_string_to_string(data: &str) -> String {
    hex::encode(hash_string(data))
}

pub fn hash_string(data: &str) -> [u8; 32] {
    hash_bytes(data.as_bytes())
}

pub fn hash_bytes(data: &[u8]) -> [u8; 32] {
    Sha3_256::digest(data).into()
}

/// AES-GCM keyed by the passphrase length
enum Cipher {
    Aes128(Aes128Gcm),
    Aes192(Aes192Gcm),
    Aes256(Aes256Gcm),
}

impl Cipher {
    fn new(passphrase: &str) -> Result<Self, CryptoError> {
        let key = passphrase.as_bytes();
        let invalid = |_| CryptoError::InvalidKey(key.len());
        match key.len() {
            16 => Aes128Gcm::new_from_slice(key).map(Self::Aes128).map_err(invalid),
            24 => Aes192Gcm::new_from_slice(key).map(Self::Aes192).map_err(invalid),
            32 => Aes256Gcm::new_from_slice(key).map(Self::Aes256).map_err(invalid),
            n => Err(CryptoError::InvalidKey(n)),
        }
    }

    fn seal(&self, nonce: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce = Nonce::<U12>::from_slice(nonce);
        match self {
            Self::Aes128(c) => c.encrypt(nonce, data),
            Self::Aes192(c) => c.encrypt(nonce, data),
            Self::Aes256(c) => c.encrypt(nonce, data),
        }
        .map_err(|_| CryptoError::Seal)
    }

    fn open(&self, nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce = Nonce::<U12>::from_slice(nonce);
        match self {
            Self::Aes128(c) => c.decrypt(nonce, ciphertext),
            Self::Aes192(c) => c.decrypt(nonce, ciphertext),
            Self::Aes256(c) => c.decrypt(nonce, ciphertext),
        }
        .map_err(|_| CryptoError::Open)
    }
}

/// Encrypt `data` with a 16, 24 or 32-byte passphrase (AES-128/192/256-GCM)
///
/// Output is hex of `nonce || ciphertext`, with a fresh random nonce per call.
pub fn encrypt(data: &[u8], passphrase: &str) -> Result<String, CryptoError> {
    let cipher = Cipher::new(passphrase)?;
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);

    let ciphertext = cipher.seal(&nonce, data)?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(hex::encode(out))
}

/// Reverse of [`encrypt`]
pub fn decrypt(encrypted: &str, passphrase: &str) -> Result<Vec<u8>, CryptoError> {
    let cipher = Cipher::new(passphrase)?;
    let data = hex::decode(encrypted)?;
    if data.len() < NONCE_LEN {
        return Err(CryptoError::Truncated);
    }
    let (nonce, ciphertext) = data.split_at(NONCE_LEN);
    cipher.open(nonce, ciphertext)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn test_hash_is_sha3_hex() {
        assert_eq!(
            hash_string_to_string("abc"),
            "3a985da74fe225b2045c172d6bd390bd855f086e3e9d525b46bfe24511431532"
        );
        assert_eq!(hash_string("abc"), hash_bytes(b"abc"));
    }

    #[test]
    fn test_encrypt_decrypt() {
        let sealed = encrypt(b"top secret", KEY).unwrap();
        assert_ne!(sealed, encrypt(b"top secret", KEY).unwrap());
        assert_eq!(decrypt(&sealed, KEY).unwrap(), b"top secret");
    }

    #[test]
    fn test_all_aes_key_sizes() {
        for key in [&KEY[..16], &KEY[..24], KEY] {
            let sealed = encrypt(b"payload", key).unwrap();
            // 12-byte nonce, 7-byte message, 16-byte tag
            assert_eq!(sealed.len(), 2 * (12 + 7 + 16));
            assert_eq!(decrypt(&sealed, key).unwrap(), b"payload");
        }
    }

    #[test]
    fn test_decrypts_known_ciphertext() {
        // AES-256-GCM, key of 32 zero bytes, zero nonce, empty plaintext
        let zero_key = "\0".repeat(32);
        let sealed = format!("{}{}", "00".repeat(12), "530f8afbc74536b9a963b4f1c4cb738b");
        assert!(decrypt(&sealed, &zero_key).unwrap().is_empty());
    }

    #[test]
    fn test_wrong_key_or_tampering_fails() {
        let sealed = encrypt(b"payload", KEY).unwrap();
        let other = "fedcba9876543210fedcba9876543210";
        assert!(matches!(decrypt(&sealed, other), Err(CryptoError::Open)));

        let mut tampered = sealed.into_bytes();
        let last = tampered.len() - 1;
        tampered[last] = if tampered[last] == b'0' { b'1' } else { b'0' };
        let tampered = String::from_utf8(tampered).unwrap();
        assert!(decrypt(&tampered, KEY).is_err());
    }

    #[test]
    fn test_key_length_is_checked() {
        assert!(matches!(encrypt(b"x", "short"), Err(CryptoError::InvalidKey(5))));
        assert!(matches!(decrypt("00", KEY), Err(CryptoError::Truncated)));
    }
}

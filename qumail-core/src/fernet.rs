//! Fernet tokens for the standard security level
//!
//! Token layout: `0x80 || timestamp (u64 BE) || IV (16) || ciphertext || HMAC-SHA256 (32)`,
//! URL-safe base64 encoded. The 32-byte key splits into a 16-byte signing key
//! and a 16-byte AES-128-CBC encryption key.

use crate::symmetric::{self, AES_128_KEY_SIZE, BLOCK_SIZE, IV_SIZE};
use crate::{QuMailError, Result};
use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

type HmacSha256 = Hmac<Sha256>;

/// Version byte of every token
pub const FERNET_VERSION: u8 = 0x80;

/// Raw key length (signing key followed by encryption key)
pub const FERNET_KEY_SIZE: usize = 32;

const HMAC_SIZE: usize = 32;
const HEADER_SIZE: usize = 1 + 8 + IV_SIZE;

/// Symmetric Fernet key
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct FernetKey {
    signing_key: [u8; AES_128_KEY_SIZE],
    encryption_key: [u8; AES_128_KEY_SIZE],
}

impl fmt::Debug for FernetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FernetKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl FernetKey {
    /// Generate a fresh random key
    pub fn generate() -> Self {
        Self {
            signing_key: symmetric::random_bytes(),
            encryption_key: symmetric::random_bytes(),
        }
    }

    /// Build a key from its 32 raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != FERNET_KEY_SIZE {
            return Err(QuMailError::Decode(format!(
                "Fernet key must be {FERNET_KEY_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        let mut key = Self {
            signing_key: [0u8; AES_128_KEY_SIZE],
            encryption_key: [0u8; AES_128_KEY_SIZE],
        };
        key.signing_key.copy_from_slice(&bytes[..AES_128_KEY_SIZE]);
        key.encryption_key.copy_from_slice(&bytes[AES_128_KEY_SIZE..]);
        Ok(key)
    }

    /// Parse the URL-safe base64 form
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let mut bytes = URL_SAFE
            .decode(encoded.as_bytes())
            .map_err(|e| QuMailError::Decode(format!("Fernet key is not base64: {e}")))?;
        let key = Self::from_bytes(&bytes);
        bytes.zeroize();
        key
    }

    /// Raw key bytes, signing key first
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(FERNET_KEY_SIZE);
        bytes.extend_from_slice(&self.signing_key);
        bytes.extend_from_slice(&self.encryption_key);
        bytes
    }

    /// URL-safe base64 form of the key
    pub fn to_base64(&self) -> String {
        let mut bytes = self.to_bytes();
        let encoded = URL_SAFE.encode(&bytes);
        bytes.zeroize();
        encoded
    }

    /// Encrypt `data` into a token stamped with the current time
    pub fn encrypt(&self, data: &[u8]) -> Result<String> {
        let timestamp = u64::try_from(Utc::now().timestamp())
            .map_err(|e| QuMailError::Crypto(format!("Time error: {e}")))?;
        self.encrypt_with(data, timestamp, &symmetric::random_bytes::<IV_SIZE>())
    }

    /// Encrypt with an explicit timestamp and IV
    pub fn encrypt_with(&self, data: &[u8], timestamp: u64, iv: &[u8; IV_SIZE]) -> Result<String> {
        let ciphertext = symmetric::aes128_cbc_encrypt(&self.encryption_key, iv, data)?;

        let mut token = Vec::with_capacity(HEADER_SIZE + ciphertext.len() + HMAC_SIZE);
        token.push(FERNET_VERSION);
        token.extend_from_slice(&timestamp.to_be_bytes());
        token.extend_from_slice(iv);
        token.extend_from_slice(&ciphertext);

        let mut mac = self.mac()?;
        mac.update(&token);
        token.extend_from_slice(&mac.finalize().into_bytes());

        Ok(URL_SAFE.encode(token))
    }

    /// Verify and decrypt a token
    pub fn decrypt(&self, token: &str) -> Result<Vec<u8>> {
        let raw = URL_SAFE
            .decode(token.as_bytes())
            .map_err(|e| QuMailError::Decode(format!("Fernet token is not base64: {e}")))?;

        if raw.len() < HEADER_SIZE + BLOCK_SIZE + HMAC_SIZE {
            return Err(QuMailError::Decode("Fernet token too short".to_string()));
        }
        if raw[0] != FERNET_VERSION {
            return Err(QuMailError::Decode(format!(
                "unsupported Fernet version 0x{:02x}",
                raw[0]
            )));
        }

        let (signed, tag) = raw.split_at(raw.len() - HMAC_SIZE);
        let mut mac = self.mac()?;
        mac.update(signed);
        mac.verify_slice(tag)
            .map_err(|_| QuMailError::Decode("Fernet token failed authentication".to_string()))?;

        let iv = &signed[9..HEADER_SIZE];
        let ciphertext = &signed[HEADER_SIZE..];
        symmetric::aes128_cbc_decrypt(&self.encryption_key, iv, ciphertext)
    }

    fn mac(&self) -> Result<HmacSha256> {
        <HmacSha256 as Mac>::new_from_slice(&self.signing_key)
            .map_err(|e| QuMailError::Crypto(format!("HMAC init failed: {e}")))
    }
}

//! Multi-level encryption engine
//!
//! Pure functions mapping `(plaintext, level, quantum key)` to an
//! [`EncryptedEnvelope`] and back:
//!
//! | Level | Algorithm | Quantum key |
//! |-------|-----------|-------------|
//! | 1 | one-time pad | at least as long as the plaintext |
//! | 2 | AES-256-CBC, first 32 key bytes | at least 32 bytes |
//! | 3 | AES-256-CBC under a fresh embedded key (post-quantum placeholder) | none |
//! | 4 | Fernet under a fresh embedded key | none |

use crate::envelope::{EmbeddedKey, EncryptedEnvelope, EnvelopePayload};
use crate::fernet::FernetKey;
use crate::symmetric::{self, AES_256_KEY_SIZE, IV_SIZE};
use crate::{QuMailError, Result, SecurityLevel};
use zeroize::Zeroizing;

/// Encrypt `plaintext` at `level`.
///
/// Levels 1 and 2 require `quantum_key`; levels 3 and 4 ignore it.
pub fn encrypt(
    plaintext: &[u8],
    level: SecurityLevel,
    quantum_key: Option<&[u8]>,
) -> Result<EncryptedEnvelope> {
    let payload = match level {
        SecurityLevel::QuantumOtp => {
            let key = require_key(level, quantum_key, plaintext.len())?;
            EnvelopePayload::Otp {
                encrypted_data: xor_prefix(plaintext, key),
                key_length_used: plaintext.len(),
            }
        }
        SecurityLevel::QuantumAes => {
            let key = require_key(level, quantum_key, AES_256_KEY_SIZE)?;
            let iv = symmetric::random_bytes::<IV_SIZE>();
            EnvelopePayload::QuantumAes {
                encrypted_data: symmetric::aes256_cbc_encrypt(
                    &key[..AES_256_KEY_SIZE],
                    &iv,
                    plaintext,
                )?,
                iv: iv.to_vec(),
            }
        }
        SecurityLevel::PostQuantum => {
            // Placeholder until a post-quantum primitive replaces it
            let key = Zeroizing::new(symmetric::random_bytes::<AES_256_KEY_SIZE>());
            let iv = symmetric::random_bytes::<IV_SIZE>();
            EnvelopePayload::PostQuantumPlaceholder {
                encrypted_data: symmetric::aes256_cbc_encrypt(&key[..], &iv, plaintext)?,
                key: EmbeddedKey::new(key.to_vec()),
                iv: iv.to_vec(),
            }
        }
        SecurityLevel::Standard => {
            let key = FernetKey::generate();
            EnvelopePayload::Standard {
                encrypted_data: key.encrypt(plaintext)?.into_bytes(),
                key: EmbeddedKey::new(key.to_base64().into_bytes()),
            }
        }
    };

    Ok(EncryptedEnvelope::new(payload))
}

/// Encrypt at a numeric level as received from a caller.
///
/// Values outside 1..=4 fail with [`QuMailError::InvalidLevel`].
pub fn encrypt_at_level(
    plaintext: &[u8],
    level: u8,
    quantum_key: Option<&[u8]>,
) -> Result<EncryptedEnvelope> {
    encrypt(plaintext, SecurityLevel::try_from(level)?, quantum_key)
}

/// Decrypt an envelope, selecting the inverse by its algorithm tag.
pub fn decrypt(envelope: &EncryptedEnvelope, quantum_key: Option<&[u8]>) -> Result<Vec<u8>> {
    let level = envelope.level()?;

    match &envelope.payload {
        EnvelopePayload::Otp {
            encrypted_data,
            key_length_used,
        } => {
            if *key_length_used != encrypted_data.len() {
                return Err(QuMailError::Decode(format!(
                    "OTP key length marker {key_length_used} does not match {} ciphertext bytes",
                    encrypted_data.len()
                )));
            }
            let key = require_key(level, quantum_key, *key_length_used)?;
            Ok(xor_prefix(encrypted_data, key))
        }
        EnvelopePayload::QuantumAes { encrypted_data, iv } => {
            let key = require_key(level, quantum_key, AES_256_KEY_SIZE)?;
            symmetric::aes256_cbc_decrypt(&key[..AES_256_KEY_SIZE], iv, encrypted_data)
        }
        EnvelopePayload::PostQuantumPlaceholder {
            encrypted_data,
            key,
            iv,
        } => {
            if key.as_bytes().len() != AES_256_KEY_SIZE {
                return Err(QuMailError::Decode(format!(
                    "embedded key must be {AES_256_KEY_SIZE} bytes"
                )));
            }
            symmetric::aes256_cbc_decrypt(key.as_bytes(), iv, encrypted_data)
        }
        EnvelopePayload::Standard {
            encrypted_data,
            key,
        } => {
            let key = FernetKey::from_base64(ascii_field(key.as_bytes(), "Fernet key")?)?;
            key.decrypt(ascii_field(encrypted_data, "Fernet token")?)
        }
    }
}

fn ascii_field<'a>(bytes: &'a [u8], what: &str) -> Result<&'a str> {
    std::str::from_utf8(bytes).map_err(|_| QuMailError::Decode(format!("{what} is not text")))
}

fn require_key<'k>(
    level: SecurityLevel,
    quantum_key: Option<&'k [u8]>,
    required: usize,
) -> Result<&'k [u8]> {
    match quantum_key {
        Some(key) if key.len() >= required => Ok(key),
        other => Err(QuMailError::KeyInsufficient {
            level: level.as_u8(),
            required,
            available: other.map_or(0, <[u8]>::len),
        }),
    }
}

fn xor_prefix(data: &[u8], key: &[u8]) -> Vec<u8> {
    data.iter().zip(key).map(|(d, k)| d ^ k).collect()
}

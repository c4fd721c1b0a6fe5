//! Block cipher primitives shared by the AES-based levels
//!
//! AES in CBC mode with explicit PKCS#7 padding over a 16-byte block. Padding
//! is applied and checked here rather than inside the cipher so that a bad
//! trailing length byte surfaces as a decode error.

use crate::{QuMailError, Result};
use aes::{Aes128, Aes256};
use cbc::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::{rngs::OsRng, RngCore};

/// AES block size in bytes
pub const BLOCK_SIZE: usize = 16;

/// AES-256 key size in bytes
pub const AES_256_KEY_SIZE: usize = 32;

/// AES-128 key size in bytes
pub const AES_128_KEY_SIZE: usize = 16;

/// CBC initialization vector size in bytes
pub const IV_SIZE: usize = 16;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;
type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// PKCS#7 pad `data` to a multiple of `BLOCK_SIZE`.
///
/// A full block of padding is appended when the input is already aligned.
pub fn pkcs7_pad(data: &[u8]) -> Vec<u8> {
    let padding_length = BLOCK_SIZE - (data.len() % BLOCK_SIZE);
    let mut padded = Vec::with_capacity(data.len() + padding_length);
    padded.extend_from_slice(data);
    // padding_length is in 1..=16
    padded.resize(data.len() + padding_length, padding_length as u8);
    padded
}

/// Strip PKCS#7 padding.
///
/// Rejects a trailing length byte of zero, one larger than the block size or
/// the data itself, and padding bytes that do not all match.
pub fn pkcs7_unpad(padded: &[u8]) -> Result<&[u8]> {
    let Some(&last) = padded.last() else {
        return Err(QuMailError::Decode("empty padded data".to_string()));
    };

    let padding_length = usize::from(last);
    if padding_length == 0 || padding_length > BLOCK_SIZE || padding_length > padded.len() {
        return Err(QuMailError::Decode(format!(
            "invalid padding length {padding_length} for {} bytes",
            padded.len()
        )));
    }

    let (content, padding) = padded.split_at(padded.len() - padding_length);
    if padding.iter().any(|&byte| byte != last) {
        return Err(QuMailError::Decode("inconsistent padding bytes".to_string()));
    }

    Ok(content)
}

/// Encrypt with AES-256-CBC, padding the plaintext first
pub fn aes256_cbc_encrypt(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256CbcEnc::new_from_slices(key, iv)
        .map_err(|e| QuMailError::Crypto(format!("AES-256-CBC init failed: {e}")))?;
    Ok(cipher.encrypt_padded_vec_mut::<NoPadding>(&pkcs7_pad(plaintext)))
}

/// Decrypt with AES-256-CBC and strip the padding
pub fn aes256_cbc_decrypt(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    check_cbc_input(iv, ciphertext)?;
    let cipher = Aes256CbcDec::new_from_slices(key, iv)
        .map_err(|e| QuMailError::Crypto(format!("AES-256-CBC init failed: {e}")))?;
    let padded = cipher
        .decrypt_padded_vec_mut::<NoPadding>(ciphertext)
        .map_err(|_| QuMailError::Decode("ciphertext is not block aligned".to_string()))?;
    Ok(pkcs7_unpad(&padded)?.to_vec())
}

/// Encrypt with AES-128-CBC, padding the plaintext first
pub fn aes128_cbc_encrypt(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes128CbcEnc::new_from_slices(key, iv)
        .map_err(|e| QuMailError::Crypto(format!("AES-128-CBC init failed: {e}")))?;
    Ok(cipher.encrypt_padded_vec_mut::<NoPadding>(&pkcs7_pad(plaintext)))
}

/// Decrypt with AES-128-CBC and strip the padding
pub fn aes128_cbc_decrypt(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    check_cbc_input(iv, ciphertext)?;
    let cipher = Aes128CbcDec::new_from_slices(key, iv)
        .map_err(|e| QuMailError::Crypto(format!("AES-128-CBC init failed: {e}")))?;
    let padded = cipher
        .decrypt_padded_vec_mut::<NoPadding>(ciphertext)
        .map_err(|_| QuMailError::Decode("ciphertext is not block aligned".to_string()))?;
    Ok(pkcs7_unpad(&padded)?.to_vec())
}

fn check_cbc_input(iv: &[u8], ciphertext: &[u8]) -> Result<()> {
    if iv.len() != IV_SIZE {
        return Err(QuMailError::Decode(format!(
            "IV must be {IV_SIZE} bytes, got {}",
            iv.len()
        )));
    }
    if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(QuMailError::Decode(format!(
            "ciphertext length {} is not a positive multiple of {BLOCK_SIZE}",
            ciphertext.len()
        )));
    }
    Ok(())
}

/// Fresh random bytes from the operating system RNG
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

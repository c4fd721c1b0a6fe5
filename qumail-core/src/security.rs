//! At-rest protection of quantum key material
//!
//! Key bytes are XORed with a SHAKE256 keystream derived from the process-wide
//! storage secret and the record's key id, so no two records share a
//! keystream. The secret comes from a [`SecretProvider`] and is read once when
//! the [`StorageProtector`] is built; it stays read-only afterwards.
//!
//! This transform is unauthenticated. Deployments that need tamper evidence on
//! stored keys should swap in an AEAD behind the same `protect`/`unprotect`
//! pair.

use crate::key_record::ProtectedKeyMaterial;
use crate::{QuMailError, Result};
use secrecy::{ExposeSecret, SecretVec};
use sha3::digest::{ExtendableOutput, Update, XofReader};
use sha3::Shake256;
use std::fmt;
use zeroize::Zeroizing;

/// Minimum accepted storage secret length in bytes
pub const MIN_STORAGE_SECRET_LEN: usize = 16;

const KEYSTREAM_DOMAIN: &[u8] = b"qumail-storage-v1";

/// Source of the storage-protection secret.
///
/// Rotation is left to implementations: a provider may hand out a new secret
/// to a newly built [`StorageProtector`], but records protected under the old
/// secret must be re-protected by the caller.
pub trait SecretProvider: Send + Sync {
    /// Fetch the current storage secret
    fn storage_secret(&self) -> Result<SecretVec<u8>>;
}

/// Secret supplied directly by the embedding application
pub struct StaticSecretProvider {
    secret: SecretVec<u8>,
}

impl StaticSecretProvider {
    /// Wrap `secret`; rejects secrets shorter than [`MIN_STORAGE_SECRET_LEN`]
    pub fn new(secret: Vec<u8>) -> Result<Self> {
        if secret.len() < MIN_STORAGE_SECRET_LEN {
            return Err(QuMailError::SecretUnavailable(format!(
                "storage secret must be at least {MIN_STORAGE_SECRET_LEN} bytes"
            )));
        }
        Ok(Self {
            secret: SecretVec::new(secret),
        })
    }
}

impl SecretProvider for StaticSecretProvider {
    fn storage_secret(&self) -> Result<SecretVec<u8>> {
        Ok(SecretVec::new(self.secret.expose_secret().clone()))
    }
}

impl fmt::Debug for StaticSecretProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticSecretProvider")
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Hex-encoded secret read from an environment variable
#[derive(Debug, Clone)]
pub struct EnvSecretProvider {
    variable: String,
}

impl EnvSecretProvider {
    /// Read from `variable` on each call
    pub fn new(variable: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
        }
    }

    /// Name of the variable consulted
    pub fn variable(&self) -> &str {
        &self.variable
    }
}

impl SecretProvider for EnvSecretProvider {
    fn storage_secret(&self) -> Result<SecretVec<u8>> {
        let encoded = Zeroizing::new(std::env::var(&self.variable).map_err(|_| {
            QuMailError::SecretUnavailable(format!("{} is not set", self.variable))
        })?);
        let secret = hex::decode(encoded.trim()).map_err(|_| {
            QuMailError::SecretUnavailable(format!("{} is not valid hex", self.variable))
        })?;
        StaticSecretProvider::new(secret)?.storage_secret()
    }
}

/// Applies and removes the at-rest transform
pub struct StorageProtector {
    secret: SecretVec<u8>,
}

impl fmt::Debug for StorageProtector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageProtector")
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl StorageProtector {
    /// Read the secret once from `provider`
    pub fn new(provider: &dyn SecretProvider) -> Result<Self> {
        let secret = provider.storage_secret()?;
        if secret.expose_secret().len() < MIN_STORAGE_SECRET_LEN {
            return Err(QuMailError::SecretUnavailable(format!(
                "storage secret must be at least {MIN_STORAGE_SECRET_LEN} bytes"
            )));
        }
        Ok(Self { secret })
    }

    /// Protect raw key bytes for storage under `key_id`
    pub fn protect(&self, key_id: &str, material: &[u8]) -> ProtectedKeyMaterial {
        ProtectedKeyMaterial::from_protected(self.apply(key_id, material))
    }

    /// Recover raw key bytes stored under `key_id`
    pub fn unprotect(&self, key_id: &str, protected: &ProtectedKeyMaterial) -> SecretVec<u8> {
        SecretVec::new(self.apply(key_id, protected.as_bytes()))
    }

    fn apply(&self, key_id: &str, data: &[u8]) -> Vec<u8> {
        let keystream = self.keystream(key_id, data.len());
        data.iter().zip(keystream.iter()).map(|(d, k)| d ^ k).collect()
    }

    fn keystream(&self, key_id: &str, len: usize) -> Zeroizing<Vec<u8>> {
        let secret = self.secret.expose_secret();
        let mut hasher = Shake256::default();
        hasher.update(KEYSTREAM_DOMAIN);
        hasher.update(&(secret.len() as u64).to_le_bytes());
        hasher.update(secret);
        hasher.update(key_id.as_bytes());

        let mut stream = Zeroizing::new(vec![0u8; len]);
        hasher.finalize_xof().read(stream.as_mut_slice());
        stream
    }
}

//! Message sealing: picks the key source per security level and runs the engine

use qumail_core::{
    decrypt, encrypt, EncryptedEnvelope, KeyRecordStore, KeySource, QuMailError, SecurityLevel,
};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::manager::QuantumKeyManager;
use crate::KmResult;

/// An encrypted message body plus the quantum key it consumed, if any
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedMessage {
    pub envelope: EncryptedEnvelope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantum_key_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_source: Option<KeySource>,
}

/// Encrypts and decrypts message bodies on behalf of a mail layer
#[derive(Debug)]
pub struct MessageCrypto<S: KeyRecordStore> {
    keys: Arc<QuantumKeyManager<S>>,
    aes_request_bytes: usize,
}

impl<S: KeyRecordStore> MessageCrypto<S> {
    /// Seal through `keys`, requesting `aes_request_bytes` for level 2 messages
    pub fn new(keys: Arc<QuantumKeyManager<S>>, aes_request_bytes: usize) -> Self {
        Self {
            keys,
            aes_request_bytes,
        }
    }

    /// Key manager in use
    pub fn keys(&self) -> &Arc<QuantumKeyManager<S>> {
        &self.keys
    }

    /// Encrypt `body` from `owner_id` to `peer_identity` at `level`.
    ///
    /// Levels 1 and 2 acquire and consume a quantum key; levels 3 and 4 do
    /// not touch the Key Manager.
    pub async fn seal(
        &self,
        owner_id: &str,
        peer_identity: &str,
        body: &[u8],
        level: SecurityLevel,
    ) -> KmResult<SealedMessage> {
        let Some(required) = level.required_key_len(body.len()) else {
            let envelope = encrypt(body, level, None)?;
            if envelope.embeds_decryption_key() {
                warn!(
                    level = level.as_u8(),
                    "Envelope carries its own decryption key and is readable by anyone holding it"
                );
            }
            return Ok(SealedMessage {
                envelope,
                quantum_key_id: None,
                key_source: None,
            });
        };

        let request_len = match level {
            SecurityLevel::QuantumAes => self.aes_request_bytes.max(required),
            _ => required.max(1),
        };

        let acquired = self
            .keys
            .acquire_key_material(owner_id, peer_identity, request_len)
            .await?;
        let envelope = encrypt(body, level, Some(acquired.material.expose_secret()))?;

        info!(
            key_id = %acquired.key_id,
            level = level.as_u8(),
            source = acquired.source.as_str(),
            "Sealed message"
        );
        Ok(SealedMessage {
            envelope,
            quantum_key_id: Some(acquired.key_id),
            key_source: Some(acquired.source),
        })
    }

    /// [`Self::seal`] with a numeric level as received from a caller
    pub async fn seal_at_level(
        &self,
        owner_id: &str,
        peer_identity: &str,
        body: &[u8],
        level: u8,
    ) -> KmResult<SealedMessage> {
        let level = SecurityLevel::try_from(level)?;
        self.seal(owner_id, peer_identity, body, level).await
    }

    /// Decrypt a sealed message, fetching its quantum key from the Key Manager
    /// by id on behalf of `peer_sae_id`
    pub async fn open(&self, sealed: &SealedMessage, peer_sae_id: &str) -> KmResult<Vec<u8>> {
        let level = sealed.envelope.level()?;
        if !level.requires_quantum_key() {
            return Ok(decrypt(&sealed.envelope, None)?);
        }

        let key_id = sealed.quantum_key_id.as_deref().ok_or_else(|| {
            QuMailError::Decode(format!("{level} message lacks its quantum key id"))
        })?;
        let key = self.keys.fetch_shared_key(key_id, peer_sae_id).await?;
        Ok(decrypt(&sealed.envelope, Some(key.material().expose_secret()))?)
    }

    /// Decrypt with caller-supplied quantum key material
    pub fn open_with_key(
        &self,
        sealed: &SealedMessage,
        quantum_key: Option<&[u8]>,
    ) -> KmResult<Vec<u8>> {
        Ok(decrypt(&sealed.envelope, quantum_key)?)
    }
}

//! ETSI GS QKD 014 style request and response bodies
//!
//! Field names follow the Key Manager's JSON exactly, hence the renames.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::{KmError, KmResult};

/// Prefix of request identifiers minted by this client
pub const REQUEST_ID_PREFIX: &str = "qkd_";

/// Body of a key issuance call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRequest {
    #[serde(rename = "key_ID")]
    pub key_id: String,
    pub size: usize,
    #[serde(rename = "additional_slave_SAE_IDs")]
    pub additional_slave_sae_ids: Vec<String>,
    #[serde(default)]
    pub extension_mandatory: Vec<serde_json::Value>,
    #[serde(default)]
    pub extension_optional: Vec<serde_json::Value>,
}

impl KeyRequest {
    /// Request `size` bytes shared with `peer_identity`, under a fresh request id
    pub fn new(peer_identity: &str, size: usize) -> Self {
        Self {
            key_id: format!("{REQUEST_ID_PREFIX}{}", Uuid::new_v4().simple()),
            size,
            additional_slave_sae_ids: vec![peer_identity.to_string()],
            extension_mandatory: Vec::new(),
            extension_optional: Vec::new(),
        }
    }
}

/// Provenance metadata attached to an issued key
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMetadata {
    #[serde(default)]
    pub generation_time: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(rename = "type", default)]
    pub key_type: Option<String>,
}

/// Successful key issuance response
#[derive(Clone, Serialize, Deserialize)]
pub struct KeyResponse {
    #[serde(rename = "key_ID")]
    pub key_id: String,
    /// Base64 key material
    pub key: String,
    #[serde(default)]
    pub size: Option<usize>,
    #[serde(default)]
    pub metadata: KeyMetadata,
}

impl std::fmt::Debug for KeyResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyResponse")
            .field("key_id", &self.key_id)
            .field("key", &"[REDACTED]")
            .field("size", &self.size)
            .field("metadata", &self.metadata)
            .finish()
    }
}

/// Key id reference inside a retrieval request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyIdRef {
    #[serde(rename = "key_ID")]
    pub key_id: String,
}

/// Body of a key retrieval by id call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyIdsRequest {
    #[serde(rename = "key_IDs")]
    pub key_ids: Vec<KeyIdRef>,
}

impl KeyIdsRequest {
    /// Ask for a single key
    pub fn single(key_id: &str) -> Self {
        Self {
            key_ids: vec![KeyIdRef {
                key_id: key_id.to_string(),
            }],
        }
    }
}

/// One key inside a [`KeyContainer`]
#[derive(Clone, Serialize, Deserialize)]
pub struct KeyEntry {
    #[serde(rename = "key_ID")]
    pub key_id: String,
    /// Base64 key material
    pub key: String,
}

impl std::fmt::Debug for KeyEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyEntry")
            .field("key_id", &self.key_id)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Retrieval response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyContainer {
    pub keys: Vec<KeyEntry>,
}

/// Decode base64 key material into a zeroizing buffer
pub fn decode_key_material(encoded: &str) -> KmResult<Zeroizing<Vec<u8>>> {
    STANDARD
        .decode(encoded.trim())
        .map(Zeroizing::new)
        .map_err(|e| KmError::InvalidResponse(format!("key is not valid base64: {e}")))
}

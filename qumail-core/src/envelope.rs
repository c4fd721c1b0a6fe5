//! Encrypted envelope: ciphertext plus the metadata needed to decrypt it
//!
//! The JSON form keeps the field names used by stored messages:
//!
//! ```json
//! { "security_level": 2, "algorithm": "AES-QKD", "encrypted_data": "...", "iv": "..." }
//! ```

use crate::encoding::base64_bytes;
use crate::{QuMailError, Result, SecurityLevel};
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Algorithm tag carried by every envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Algorithm {
    /// One-time pad
    #[serde(rename = "OTP")]
    Otp,
    /// AES-256-CBC keyed by quantum key material
    #[serde(rename = "AES-QKD")]
    QuantumAes,
    /// Placeholder post-quantum scheme
    #[serde(rename = "PQC-AES")]
    PostQuantumPlaceholder,
    /// Fernet-equivalent authenticated encryption
    #[serde(rename = "STANDARD")]
    Standard,
}

impl Algorithm {
    /// Wire tag
    pub const fn tag(self) -> &'static str {
        match self {
            Algorithm::Otp => "OTP",
            Algorithm::QuantumAes => "AES-QKD",
            Algorithm::PostQuantumPlaceholder => "PQC-AES",
            Algorithm::Standard => "STANDARD",
        }
    }

    /// Security level this algorithm implements
    pub const fn security_level(self) -> SecurityLevel {
        match self {
            Algorithm::Otp => SecurityLevel::QuantumOtp,
            Algorithm::QuantumAes => SecurityLevel::QuantumAes,
            Algorithm::PostQuantumPlaceholder => SecurityLevel::PostQuantum,
            Algorithm::Standard => SecurityLevel::Standard,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Symmetric key carried inside a level 3 or level 4 envelope.
///
/// Anyone who can read the envelope can decrypt it; see
/// [`EncryptedEnvelope::embeds_decryption_key`].
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct EmbeddedKey(#[serde(with = "base64_bytes")] Vec<u8>);

impl EmbeddedKey {
    /// Wrap raw key bytes
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Raw key bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for EmbeddedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EmbeddedKey([REDACTED; {}])", self.0.len())
    }
}

/// Level-specific envelope contents, tagged by algorithm
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "algorithm")]
pub enum EnvelopePayload {
    /// XOR of the plaintext with the first `key_length_used` key bytes
    #[serde(rename = "OTP")]
    Otp {
        #[serde(with = "base64_bytes")]
        encrypted_data: Vec<u8>,
        key_length_used: usize,
    },
    /// AES-256-CBC under the first 32 quantum key bytes
    #[serde(rename = "AES-QKD")]
    QuantumAes {
        #[serde(with = "base64_bytes")]
        encrypted_data: Vec<u8>,
        #[serde(with = "base64_bytes")]
        iv: Vec<u8>,
    },
    /// AES-256-CBC under a fresh key shipped alongside the ciphertext
    #[serde(rename = "PQC-AES")]
    PostQuantumPlaceholder {
        #[serde(with = "base64_bytes")]
        encrypted_data: Vec<u8>,
        key: EmbeddedKey,
        #[serde(with = "base64_bytes")]
        iv: Vec<u8>,
    },
    /// Fernet token under a fresh key shipped alongside the token.
    ///
    /// Both fields hold ASCII text (the URL-safe token and the URL-safe key)
    /// and are base64 encoded once more on the wire.
    #[serde(rename = "STANDARD")]
    Standard {
        #[serde(with = "base64_bytes")]
        encrypted_data: Vec<u8>,
        key: EmbeddedKey,
    },
}

impl EnvelopePayload {
    /// Algorithm tag of this payload
    pub const fn algorithm(&self) -> Algorithm {
        match self {
            EnvelopePayload::Otp { .. } => Algorithm::Otp,
            EnvelopePayload::QuantumAes { .. } => Algorithm::QuantumAes,
            EnvelopePayload::PostQuantumPlaceholder { .. } => Algorithm::PostQuantumPlaceholder,
            EnvelopePayload::Standard { .. } => Algorithm::Standard,
        }
    }
}

/// Envelope produced by [`crate::encrypt`] and consumed by [`crate::decrypt`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    /// Numeric security level, 1 to 4
    pub security_level: u8,
    /// Algorithm-tagged contents
    #[serde(flatten)]
    pub payload: EnvelopePayload,
}

impl EncryptedEnvelope {
    /// Wrap a payload under its own level
    pub fn new(payload: EnvelopePayload) -> Self {
        Self {
            security_level: payload.algorithm().security_level().as_u8(),
            payload,
        }
    }

    /// Algorithm tag
    pub fn algorithm(&self) -> Algorithm {
        self.payload.algorithm()
    }

    /// Validated security level.
    ///
    /// Fails with a decode error when the numeric level is out of range or
    /// disagrees with the algorithm tag.
    pub fn level(&self) -> Result<SecurityLevel> {
        let level = SecurityLevel::try_from(self.security_level).map_err(|_| {
            QuMailError::Decode(format!(
                "envelope carries unknown security level {}",
                self.security_level
            ))
        })?;
        let algorithm = self.algorithm();
        if algorithm.security_level() != level {
            return Err(QuMailError::Decode(format!(
                "algorithm {algorithm} does not match security level {}",
                self.security_level
            )));
        }
        Ok(level)
    }

    /// Whether the envelope carries its own decryption key.
    ///
    /// True for levels 3 and 4: the ciphertext is readable by anyone holding
    /// the envelope.
    pub fn embeds_decryption_key(&self) -> bool {
        matches!(
            self.payload,
            EnvelopePayload::PostQuantumPlaceholder { .. } | EnvelopePayload::Standard { .. }
        )
    }

    /// Serialize to the stored JSON form
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| QuMailError::Crypto(format!("envelope serialization failed: {e}")))
    }

    /// Parse the stored JSON form and validate its tags
    pub fn from_json(json: &str) -> Result<Self> {
        let envelope: Self = serde_json::from_str(json)
            .map_err(|e| QuMailError::Decode(format!("envelope parse failed: {e}")))?;
        envelope.level()?;
        Ok(envelope)
    }
}

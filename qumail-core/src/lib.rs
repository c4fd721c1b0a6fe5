//! QuMail Core - multi-level message encryption
//!
//! This crate holds the pure half of QuMail: the four security levels, the
//! encryption engine that maps plaintext to a tagged envelope and back, and the
//! quantum key record model together with its storage seam and at-rest
//! protection. Talking to a Key Manager lives in `qumail-km`.

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod crypto;
pub mod envelope;
pub mod error;
pub mod fernet;
pub mod key_record;
pub mod security;
pub mod store;
pub mod symmetric;

mod encoding;

pub use crypto::{decrypt, encrypt, encrypt_at_level};
pub use envelope::{Algorithm, EmbeddedKey, EncryptedEnvelope, EnvelopePayload};
pub use error::{ErrorCategory, QuMailError};
pub use key_record::{
    KeySource, KeyState, KeyStatus, KeySummary, KeyType, NewKeyRecord, ProtectedKeyMaterial,
    QuantumKeyRecord,
};
pub use security::{EnvSecretProvider, SecretProvider, StaticSecretProvider, StorageProtector};
pub use store::{ConsumeOutcome, InMemoryKeyStore, KeyRecordStore};

/// Result type for QuMail core operations
pub type Result<T> = std::result::Result<T, QuMailError>;

/// Security level chosen by the sender of a message.
///
/// Levels 1 and 2 depend on quantum key material; levels 3 and 4 are
/// self-contained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum SecurityLevel {
    /// Level 1: one-time pad over quantum key material
    QuantumOtp,
    /// Level 2: AES-256-CBC keyed by quantum key material
    QuantumAes,
    /// Level 3: placeholder for a post-quantum scheme
    PostQuantum,
    /// Level 4: standard authenticated symmetric encryption
    Standard,
}

impl SecurityLevel {
    /// All levels, in numeric order
    pub const ALL: [SecurityLevel; 4] = [
        SecurityLevel::QuantumOtp,
        SecurityLevel::QuantumAes,
        SecurityLevel::PostQuantum,
        SecurityLevel::Standard,
    ];

    /// Numeric level as carried on the wire
    pub const fn as_u8(self) -> u8 {
        match self {
            SecurityLevel::QuantumOtp => 1,
            SecurityLevel::QuantumAes => 2,
            SecurityLevel::PostQuantum => 3,
            SecurityLevel::Standard => 4,
        }
    }

    /// The algorithm that protects messages at this level
    pub const fn algorithm(self) -> Algorithm {
        match self {
            SecurityLevel::QuantumOtp => Algorithm::Otp,
            SecurityLevel::QuantumAes => Algorithm::QuantumAes,
            SecurityLevel::PostQuantum => Algorithm::PostQuantumPlaceholder,
            SecurityLevel::Standard => Algorithm::Standard,
        }
    }

    /// Whether this level consumes quantum key material
    pub const fn requires_quantum_key(self) -> bool {
        matches!(self, SecurityLevel::QuantumOtp | SecurityLevel::QuantumAes)
    }

    /// Minimum quantum key length for a plaintext of `plaintext_len` bytes,
    /// or `None` when the level needs no quantum key.
    pub const fn required_key_len(self, plaintext_len: usize) -> Option<usize> {
        match self {
            SecurityLevel::QuantumOtp => Some(plaintext_len),
            SecurityLevel::QuantumAes => Some(symmetric::AES_256_KEY_SIZE),
            SecurityLevel::PostQuantum | SecurityLevel::Standard => None,
        }
    }
}

impl TryFrom<u8> for SecurityLevel {
    type Error = QuMailError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(SecurityLevel::QuantumOtp),
            2 => Ok(SecurityLevel::QuantumAes),
            3 => Ok(SecurityLevel::PostQuantum),
            4 => Ok(SecurityLevel::Standard),
            other => Err(QuMailError::InvalidLevel(other)),
        }
    }
}

impl From<SecurityLevel> for u8 {
    fn from(level: SecurityLevel) -> Self {
        level.as_u8()
    }
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "level {} ({})", self.as_u8(), self.algorithm())
    }
}

/// QuMail protocol version
pub const QUMAIL_VERSION: &str = "0.1.0";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_numbering() {
        for (index, level) in SecurityLevel::ALL.iter().enumerate() {
            let number = u8::try_from(index + 1).unwrap();
            assert_eq!(level.as_u8(), number);
            assert_eq!(SecurityLevel::try_from(number).unwrap(), *level);
        }
    }

    #[test]
    fn test_invalid_levels_rejected() {
        for value in [0u8, 5, 42, 255] {
            assert!(matches!(
                SecurityLevel::try_from(value),
                Err(QuMailError::InvalidLevel(v)) if v == value
            ));
        }
    }

    #[test]
    fn test_quantum_requirements() {
        assert_eq!(SecurityLevel::QuantumOtp.required_key_len(13), Some(13));
        assert_eq!(SecurityLevel::QuantumAes.required_key_len(1000), Some(32));
        assert_eq!(SecurityLevel::PostQuantum.required_key_len(10), None);
        assert!(!SecurityLevel::Standard.requires_quantum_key());
    }

    #[test]
    fn test_level_serializes_as_integer() {
        let json = serde_json::to_string(&SecurityLevel::QuantumAes).unwrap();
        assert_eq!(json, "2");
        assert!(serde_json::from_str::<SecurityLevel>("7").is_err());
    }
}

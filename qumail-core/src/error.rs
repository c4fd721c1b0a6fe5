//! Error types for QuMail core operations

use thiserror::Error;

#[derive(Error, Debug)]
pub enum QuMailError {
    #[error(
        "Quantum key too short for level {level}: {required} bytes required, {available} available"
    )]
    KeyInsufficient {
        level: u8,
        required: usize,
        available: usize,
    },

    #[error("Invalid security level: {0}")]
    InvalidLevel(u8),

    #[error("Quantum key expired or already consumed: {0}")]
    KeyExpiredOrConsumed(String),

    #[error("Malformed envelope: {0}")]
    Decode(String),

    #[error("Invalid key request: {0}")]
    InvalidKeyRequest(String),

    #[error("Key storage error: {0}")]
    Storage(String),

    #[error("Cryptographic operation failed: {0}")]
    Crypto(String),

    #[error("Storage secret unavailable: {0}")]
    SecretUnavailable(String),
}

impl QuMailError {
    /// Get error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            QuMailError::KeyInsufficient { .. } => ErrorCategory::KeyInsufficient,
            QuMailError::InvalidLevel(_) => ErrorCategory::InvalidLevel,
            QuMailError::KeyExpiredOrConsumed(_) => ErrorCategory::KeyExpiredOrConsumed,
            QuMailError::Decode(_) => ErrorCategory::Decode,
            QuMailError::InvalidKeyRequest(_) => ErrorCategory::InvalidRequest,
            QuMailError::Storage(_) => ErrorCategory::Storage,
            QuMailError::Crypto(_) | QuMailError::SecretUnavailable(_) => ErrorCategory::Internal,
        }
    }

    /// Terse reason suitable for showing to an end user
    pub fn failure_reason(&self) -> &'static str {
        self.category().failure_reason()
    }
}

/// Error categories surfaced to the orchestration layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Key Manager unreachable and no fallback available
    Transport,
    /// Key Manager answered with a non-success status
    Protocol,
    KeyInsufficient,
    InvalidLevel,
    KeyExpiredOrConsumed,
    Decode,
    InvalidRequest,
    Storage,
    Configuration,
    Internal,
}

impl ErrorCategory {
    /// Terse, secret-free description of the category
    pub fn failure_reason(self) -> &'static str {
        match self {
            ErrorCategory::Transport => "Key Manager unreachable",
            ErrorCategory::Protocol => "Key Manager rejected the request",
            ErrorCategory::KeyInsufficient => "Quantum key too short for the requested level",
            ErrorCategory::InvalidLevel => "Invalid security level",
            ErrorCategory::KeyExpiredOrConsumed => "Quantum key expired or invalid",
            ErrorCategory::Decode => "Encrypted data is malformed",
            ErrorCategory::InvalidRequest => "Invalid key request",
            ErrorCategory::Storage => "Key storage failure",
            ErrorCategory::Configuration => "Configuration error",
            ErrorCategory::Internal => "Internal cryptographic failure",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        let error = QuMailError::InvalidLevel(9);
        assert_eq!(error.category(), ErrorCategory::InvalidLevel);
        assert_eq!(error.failure_reason(), "Invalid security level");

        let error = QuMailError::KeyInsufficient {
            level: 1,
            required: 13,
            available: 4,
        };
        assert_eq!(error.category(), ErrorCategory::KeyInsufficient);

        let error = QuMailError::SecretUnavailable("QUMAIL_STORAGE_SECRET".to_string());
        assert_eq!(error.category(), ErrorCategory::Internal);
    }

    #[test]
    fn test_failure_reasons_are_terse() {
        let error = QuMailError::Decode("padding length 200 exceeds block".to_string());
        assert!(!error.failure_reason().contains("200"));
    }
}

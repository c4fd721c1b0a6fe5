//! Error types for Key Manager access and message sealing

use qumail_core::{ErrorCategory, QuMailError};

/// Result type for Key Manager operations
pub type KmResult<T> = std::result::Result<T, KmError>;

/// Key Manager error types
#[derive(thiserror::Error, Debug)]
pub enum KmError {
    #[error("Key Manager unreachable: {0}")]
    Transport(String),

    #[error("Key Manager returned status {status}: {body}")]
    Protocol { status: u16, body: String },

    #[error("Invalid Key Manager response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("Configuration serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error(transparent)]
    Core(#[from] QuMailError),
}

impl KmError {
    /// Check if a caller-side retry could succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            KmError::Transport(_) => true,
            KmError::Protocol { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Get error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            KmError::Transport(_) => ErrorCategory::Transport,
            KmError::Protocol { .. } => ErrorCategory::Protocol,
            KmError::InvalidResponse(_) => ErrorCategory::Decode,
            KmError::Configuration(_)
            | KmError::Io(_)
            | KmError::TomlDe(_)
            | KmError::TomlSer(_) => ErrorCategory::Configuration,
            KmError::Core(inner) => inner.category(),
        }
    }

    /// Terse reason suitable for showing to an end user
    pub fn failure_reason(&self) -> &'static str {
        self.category().failure_reason()
    }

    /// Suggested delay before a caller retries, if retrying makes sense
    pub fn retry_delay_ms(&self) -> Option<u64> {
        if !self.is_recoverable() {
            return None;
        }

        match self {
            KmError::Protocol { status: 429, .. } => Some(30_000),
            KmError::Protocol { .. } => Some(5_000),
            _ => Some(1_000),
        }
    }
}

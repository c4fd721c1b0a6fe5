//! Configuration for QuMail Key Manager access

use crate::{KmError, KmResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Environment variable overriding [`KmConfig::base_url`]
pub const ENV_KM_BASE_URL: &str = "KM_BASE_URL";
/// Environment variable overriding [`KmConfig::api_key`]
pub const ENV_KM_API_KEY: &str = "KM_API_KEY";

/// QuMail configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuMailConfig {
    /// Key Manager connection
    pub km: KmConfig,
    /// Quantum key policy
    pub keys: KeyPolicyConfig,
}

/// Key Manager connection settings
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KmConfig {
    /// Base URL of the Key Manager
    pub base_url: String,
    /// Bearer token sent with every request
    pub api_key: String,
    /// Timeout for key issuance and retrieval
    pub request_timeout_ms: u64,
    /// Timeout for the liveness check
    pub status_timeout_ms: u64,
    /// Fabricate simulator keys when the Key Manager is unreachable
    pub allow_simulator_fallback: bool,
    /// Key issuance endpoint
    pub key_request_path: String,
    /// Key retrieval by id endpoint
    pub key_retrieval_path: String,
    /// Liveness endpoint
    pub status_path: String,
}

/// Quantum key lifecycle settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyPolicyConfig {
    /// Validity window of an issued key
    pub validity_hours: u32,
    /// Key length requested for level 2 messages
    pub aes_request_bytes: usize,
    /// Variable holding the hex-encoded storage-protection secret
    pub storage_secret_env: String,
}

impl Default for KmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            api_key: "test-key".to_string(),
            request_timeout_ms: 30_000,
            status_timeout_ms: 10_000,
            allow_simulator_fallback: true,
            key_request_path: "/api/v1/keys/get_key".to_string(),
            key_retrieval_path: "/api/v1/keys/dec_keys".to_string(),
            status_path: "/api/v1/status".to_string(),
        }
    }
}

impl fmt::Debug for KmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KmConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("status_timeout_ms", &self.status_timeout_ms)
            .field("allow_simulator_fallback", &self.allow_simulator_fallback)
            .field("key_request_path", &self.key_request_path)
            .field("key_retrieval_path", &self.key_retrieval_path)
            .field("status_path", &self.status_path)
            .finish()
    }
}

impl KmConfig {
    /// Key issuance and retrieval timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Liveness check timeout
    pub fn status_timeout(&self) -> Duration {
        Duration::from_millis(self.status_timeout_ms)
    }

    /// Parsed base URL
    pub fn parsed_base_url(&self) -> KmResult<Url> {
        Url::parse(&self.base_url)
            .map_err(|e| KmError::Configuration(format!("invalid Key Manager URL: {e}")))
    }

    /// Join an endpoint path onto the base URL, keeping any base path prefix
    pub fn endpoint(&self, path: &str) -> KmResult<Url> {
        let base = self.parsed_base_url()?;
        let joined = format!("{}{}", base.as_str().trim_end_matches('/'), path);
        Url::parse(&joined)
            .map_err(|e| KmError::Configuration(format!("invalid endpoint {path}: {e}")))
    }
}

impl Default for KeyPolicyConfig {
    fn default() -> Self {
        Self {
            validity_hours: 24,
            aes_request_bytes: 256,
            storage_secret_env: "QUMAIL_STORAGE_SECRET".to_string(),
        }
    }
}

impl KeyPolicyConfig {
    /// Validity window as a duration
    pub fn validity(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.validity_hours))
    }
}

impl QuMailConfig {
    /// Load configuration from file
    pub fn load_from_file(path: &Path) -> KmResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: QuMailConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: &Path) -> KmResult<()> {
        let content = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get default configuration directory
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir().unwrap_or_default().join("qumail")
    }

    /// Get default configuration file path
    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join("config.toml")
    }

    /// Apply `KM_BASE_URL` and `KM_API_KEY` from the process environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(base_url) = lookup(ENV_KM_BASE_URL).filter(|v| !v.is_empty()) {
            self.km.base_url = base_url;
        }
        if let Some(api_key) = lookup(ENV_KM_API_KEY).filter(|v| !v.is_empty()) {
            self.km.api_key = api_key;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        let url = Url::parse(&self.km.base_url)
            .map_err(|e| format!("Key Manager URL is invalid: {e}"))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err("Key Manager URL must use http or https".to_string());
        }

        if self.km.request_timeout_ms == 0 {
            return Err("Request timeout cannot be zero".to_string());
        }

        if self.km.status_timeout_ms == 0 {
            return Err("Status timeout cannot be zero".to_string());
        }

        for path in [
            &self.km.key_request_path,
            &self.km.key_retrieval_path,
            &self.km.status_path,
        ] {
            if !path.starts_with('/') {
                return Err(format!("Endpoint path must start with '/': {path}"));
            }
        }

        if self.keys.validity_hours == 0 {
            return Err("Key validity cannot be zero".to_string());
        }

        if self.keys.aes_request_bytes < qumail_core::symmetric::AES_256_KEY_SIZE {
            return Err(format!(
                "Level 2 key requests must be at least {} bytes",
                qumail_core::symmetric::AES_256_KEY_SIZE
            ));
        }

        if self.keys.storage_secret_env.is_empty() {
            return Err("Storage secret variable name cannot be empty".to_string());
        }

        Ok(())
    }
}

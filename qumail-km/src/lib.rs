//! QuMail Key Manager access
//!
//! This crate connects the pure engine in `qumail-core` to a quantum Key
//! Manager speaking an ETSI GS QKD 014 style protocol:
//!
//! - [`KmClient`]: key issuance with a tagged simulator fallback, retrieval by
//!   key id, and a liveness check
//! - [`QuantumKeyManager`]: reuse, issuance, protected storage and
//!   single-use consumption of quantum key records
//! - [`MessageCrypto`]: per-level sealing and opening of message bodies
//! - [`QuMailConfig`]: TOML configuration with environment overrides

pub mod client;
pub mod config;
pub mod error;
pub mod manager;
pub mod orchestrator;
pub mod simulator;
pub mod wire;

pub use client::{ConnectionStatus, DeliveredKey, KeyManagerApi, KmClient, LinkStatus};
pub use config::{KeyPolicyConfig, KmConfig, QuMailConfig};
pub use error::{KmError, KmResult};
pub use manager::{AcquiredKey, QuantumKeyManager};
pub use orchestrator::{MessageCrypto, SealedMessage};
pub use simulator::KeySimulator;

use qumail_core::{EnvSecretProvider, InMemoryKeyStore, StorageProtector};
use std::sync::Arc;

/// Build a client, an in-memory key manager and a sealer from `config`,
/// reading the storage secret from the configured environment variable.
pub fn in_memory_stack(config: &QuMailConfig) -> KmResult<MessageCrypto<InMemoryKeyStore>> {
    config.validate().map_err(KmError::Configuration)?;

    let client = KmClient::new(config.km.clone())?;
    let provider = EnvSecretProvider::new(config.keys.storage_secret_env.clone());
    let protector = StorageProtector::new(&provider)?;
    let manager = QuantumKeyManager::new(
        Arc::new(InMemoryKeyStore::new()),
        Arc::new(client),
        protector,
        config.keys.validity(),
    )?;

    Ok(MessageCrypto::new(Arc::new(manager), config.keys.aes_request_bytes))
}

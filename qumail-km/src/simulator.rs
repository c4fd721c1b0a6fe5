//! Local stand-in for an unreachable Key Manager
//!
//! Material issued here is random but not quantum-derived, and nothing else
//! can reproduce it. Every key carries [`KeySource::Simulator`] and a
//! `sim_qkd_` id so degraded operation is visible downstream.

use chrono::Utc;
use qumail_core::{KeySource, KeyType};
use rand::{rngs::OsRng, RngCore};
use secrecy::SecretVec;
use uuid::Uuid;

use crate::client::DeliveredKey;

/// Prefix of simulator-issued key ids
pub const SIMULATED_KEY_PREFIX: &str = "sim_qkd_";

/// Whether `key_id` was minted by the simulator
pub fn is_simulated_key_id(key_id: &str) -> bool {
    key_id.starts_with(SIMULATED_KEY_PREFIX)
}

/// Fabricates symmetric keys from the OS random source
#[derive(Debug, Default, Clone, Copy)]
pub struct KeySimulator;

impl KeySimulator {
    /// Issue `size` random bytes under a fresh simulator key id
    pub fn issue(&self, size: usize) -> DeliveredKey {
        let mut material = vec![0u8; size];
        OsRng.fill_bytes(&mut material);

        DeliveredKey::new(
            format!("{SIMULATED_KEY_PREFIX}{}", Uuid::new_v4().simple()),
            SecretVec::new(material),
            KeySource::Simulator,
            KeyType::Symmetric,
            Some(Utc::now().to_rfc3339()),
        )
    }
}

//! Quantum key lifecycle
//!
//! [`QuantumKeyManager`] answers "give me a usable key for (owner, peer,
//! length)" by reusing an unused, unexpired record or asking the Key Manager
//! for a fresh one. Material is stored protected and handed out exactly once
//! for symmetric keys.

use chrono::{DateTime, Duration, Utc};
use qumail_core::{
    ConsumeOutcome, KeyRecordStore, KeySource, KeySummary, NewKeyRecord, QuMailError,
    QuantumKeyRecord, StorageProtector,
};
use secrecy::{ExposeSecret, SecretVec};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::client::{ConnectionStatus, DeliveredKey, KeyManagerApi};
use crate::{KmError, KmResult};

/// Attempts made by [`QuantumKeyManager::acquire_key_material`] when a
/// concurrent caller consumes the chosen record first
pub const MAX_ACQUIRE_ATTEMPTS: usize = 2;

/// Key material that has been consumed for use
pub struct AcquiredKey {
    /// Id of the consumed record
    pub key_id: String,
    /// Provenance of the material
    pub source: KeySource,
    /// Raw key bytes
    pub material: SecretVec<u8>,
}

impl fmt::Debug for AcquiredKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcquiredKey")
            .field("key_id", &self.key_id)
            .field("source", &self.source)
            .field("material", &"[REDACTED]")
            .finish()
    }
}

/// Issues, caches and consumes quantum key records
pub struct QuantumKeyManager<S: KeyRecordStore> {
    store: Arc<S>,
    km: Arc<dyn KeyManagerApi>,
    protector: StorageProtector,
    validity: Duration,
}

impl<S: KeyRecordStore> fmt::Debug for QuantumKeyManager<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuantumKeyManager")
            .field("validity", &self.validity)
            .finish_non_exhaustive()
    }
}

impl<S: KeyRecordStore> QuantumKeyManager<S> {
    /// Create a manager issuing records valid for `validity`
    pub fn new(
        store: Arc<S>,
        km: Arc<dyn KeyManagerApi>,
        protector: StorageProtector,
        validity: Duration,
    ) -> KmResult<Self> {
        if validity <= Duration::zero() {
            return Err(KmError::Configuration("key validity must be positive".to_string()));
        }
        Ok(Self {
            store,
            km,
            protector,
            validity,
        })
    }

    /// Underlying record store
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Return a usable record for `(owner_id, peer_identity)` holding at least
    /// `length` bytes, issuing a new one through the Key Manager if needed.
    pub async fn get_key(
        &self,
        owner_id: &str,
        peer_identity: &str,
        length: usize,
    ) -> KmResult<QuantumKeyRecord> {
        if length == 0 {
            return Err(invalid_request("key length must be positive"));
        }
        if owner_id.trim().is_empty() {
            return Err(invalid_request("owner id must not be empty"));
        }
        if peer_identity.trim().is_empty() {
            return Err(invalid_request("peer identity must not be empty"));
        }

        let now = Utc::now();
        if let Some(record) = self
            .store
            .find_usable(owner_id, peer_identity, length, now)
            .await?
        {
            debug!(key_id = %record.key_id(), "Reusing unconsumed quantum key");
            return Ok(record);
        }

        let delivered = self.km.request_key(peer_identity, length).await?;
        let record = self.issue_record(owner_id, peer_identity, length, &delivered)?;
        self.store.insert(record.clone()).await?;

        info!(
            key_id = %record.key_id(),
            owner = %owner_id,
            length,
            source = record.source().as_str(),
            "Stored quantum key"
        );
        if record.source() == KeySource::Simulator {
            warn!(key_id = %record.key_id(), "Stored key is simulated, not quantum-derived");
        }
        Ok(record)
    }

    fn issue_record(
        &self,
        owner_id: &str,
        peer_identity: &str,
        length: usize,
        delivered: &DeliveredKey,
    ) -> KmResult<QuantumKeyRecord> {
        let protected = self
            .protector
            .protect(delivered.key_id(), delivered.material().expose_secret());

        Ok(QuantumKeyRecord::issue(NewKeyRecord {
            key_id: delivered.key_id().to_string(),
            owner_id: owner_id.to_string(),
            peer_identity: peer_identity.to_string(),
            key_material_at_rest: protected,
            requested_length: length,
            key_type: delivered.key_type(),
            source: delivered.source(),
            sequence_number: rand::random(),
            created_at: Utc::now(),
            validity: self.validity,
        })?)
    }

    /// Recover the raw bytes of `record`.
    ///
    /// Symmetric records are consumed by this call: the store flips them to
    /// consumed atomically, so a second retrieval fails with
    /// [`QuMailError::KeyExpiredOrConsumed`].
    pub async fn retrieve_key_material(
        &self,
        record: &QuantumKeyRecord,
    ) -> KmResult<SecretVec<u8>> {
        let key_id = record.key_id();
        let now = Utc::now();

        let stored = if record.key_type().consumed_on_read() {
            self.consume(key_id, now).await?
        } else {
            let stored = self
                .store
                .get(key_id)
                .await?
                .ok_or_else(|| QuMailError::Storage(format!("unknown key id {key_id}")))?;
            if !stored.is_usable(now) {
                return Err(QuMailError::KeyExpiredOrConsumed(key_id.to_string()).into());
            }
            stored
        };

        Ok(self
            .protector
            .unprotect(stored.key_id(), stored.key_material_at_rest()))
    }

    async fn consume(&self, key_id: &str, now: DateTime<Utc>) -> KmResult<QuantumKeyRecord> {
        match self.store.consume_if_usable(key_id, now).await? {
            ConsumeOutcome::Consumed(stored) => {
                debug!(%key_id, "Consumed quantum key");
                Ok(stored)
            }
            ConsumeOutcome::AlreadyConsumed | ConsumeOutcome::Expired => {
                Err(QuMailError::KeyExpiredOrConsumed(key_id.to_string()).into())
            }
            ConsumeOutcome::NotFound => {
                Err(QuMailError::Storage(format!("unknown key id {key_id}")).into())
            }
        }
    }

    /// Get a key and consume it in one step.
    ///
    /// The record is consumed whatever its key type: material handed out
    /// here feeds a cipher and must never be served twice.
    ///
    /// If another caller consumes the chosen record between lookup and
    /// consumption, the lookup is repeated, which issues a fresh key when no
    /// other usable record exists.
    pub async fn acquire_key_material(
        &self,
        owner_id: &str,
        peer_identity: &str,
        length: usize,
    ) -> KmResult<AcquiredKey> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let record = self.get_key(owner_id, peer_identity, length).await?;
            match self.consume(record.key_id(), Utc::now()).await {
                Ok(stored) => {
                    return Ok(AcquiredKey {
                        key_id: stored.key_id().to_string(),
                        source: stored.source(),
                        material: self
                            .protector
                            .unprotect(stored.key_id(), stored.key_material_at_rest()),
                    });
                }
                Err(KmError::Core(QuMailError::KeyExpiredOrConsumed(key_id)))
                    if attempt < MAX_ACQUIRE_ATTEMPTS =>
                {
                    debug!(%key_id, attempt, "Key consumed concurrently, retrying lookup");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Fetch the material behind `key_id` from the Key Manager, as the
    /// receiving side of a message does
    pub async fn fetch_shared_key(
        &self,
        key_id: &str,
        peer_sae_id: &str,
    ) -> KmResult<DeliveredKey> {
        self.km.retrieve_key_by_id(key_id, peer_sae_id).await
    }

    /// Summaries of all keys held by `owner_id`, newest first
    pub async fn list_keys(&self, owner_id: &str) -> KmResult<Vec<KeySummary>> {
        let now = Utc::now();
        let mut summaries: Vec<KeySummary> = self
            .store
            .list_for_owner(owner_id)
            .await?
            .iter()
            .map(|record| record.summary(now))
            .collect();
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(summaries)
    }

    /// Key Manager liveness
    pub async fn check_connection(&self) -> ConnectionStatus {
        self.km.check_connection().await
    }
}

fn invalid_request(reason: &str) -> KmError {
    QuMailError::InvalidKeyRequest(reason.to_string()).into()
}

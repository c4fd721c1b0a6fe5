//! Persistence seam for quantum key records
//!
//! The [`KeyRecordStore`] trait is what a real database must provide. Its one
//! non-trivial method, [`KeyRecordStore::consume_if_usable`], must flip a
//! record from issued to consumed as a single conditional write so that two
//! concurrent readers never both obtain live material.

use crate::key_record::{KeyStatus, QuantumKeyRecord};
use crate::{QuMailError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Result of an atomic consume attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// This caller won; the record as stored after the flip
    Consumed(QuantumKeyRecord),
    /// Someone already spent the record
    AlreadyConsumed,
    /// The validity window elapsed before consumption
    Expired,
    /// No record with that id
    NotFound,
}

/// Storage of quantum key records, keyed by `key_id` and by `(owner, peer)`
#[async_trait]
pub trait KeyRecordStore: Send + Sync {
    /// Insert a new record; fails if the key id already exists
    async fn insert(&self, record: QuantumKeyRecord) -> Result<()>;

    /// Fetch a record by key id
    async fn get(&self, key_id: &str) -> Result<Option<QuantumKeyRecord>>;

    /// Oldest record for `(owner_id, peer_identity)` that is usable at `now`
    /// and holds at least `min_length` bytes
    async fn find_usable(
        &self,
        owner_id: &str,
        peer_identity: &str,
        min_length: usize,
        now: DateTime<Utc>,
    ) -> Result<Option<QuantumKeyRecord>>;

    /// All records owned by `owner_id`
    async fn list_for_owner(&self, owner_id: &str) -> Result<Vec<QuantumKeyRecord>>;

    /// Atomically transition `Issued -> Consumed` if the record is usable at `now`
    async fn consume_if_usable(&self, key_id: &str, now: DateTime<Utc>) -> Result<ConsumeOutcome>;
}

#[derive(Debug, Default)]
struct StoreInner {
    records: HashMap<String, QuantumKeyRecord>,
    by_pair: HashMap<(String, String), Vec<String>>,
}

/// In-process store: a record arena plus an `(owner, peer)` index behind one lock
#[derive(Debug, Default)]
pub struct InMemoryKeyStore {
    inner: RwLock<StoreInner>,
}

impl InMemoryKeyStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records held
    pub async fn len(&self) -> usize {
        self.inner.read().await.records.len()
    }

    /// Whether the store holds no records
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.records.is_empty()
    }

    /// Drop records that can never be used again at `now`.
    ///
    /// Expiry is enforced on every read regardless; this only reclaims space.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut inner = self.inner.write().await;
        let dead: Vec<String> = inner
            .records
            .values()
            .filter(|record| record.status(now) != KeyStatus::Usable)
            .map(|record| record.key_id().to_string())
            .collect();

        for key_id in &dead {
            if let Some(record) = inner.records.remove(key_id) {
                let pair = (record.owner_id().to_string(), record.peer_identity().to_string());
                if let Some(ids) = inner.by_pair.get_mut(&pair) {
                    ids.retain(|id| id != key_id);
                    if ids.is_empty() {
                        inner.by_pair.remove(&pair);
                    }
                }
            }
        }
        dead.len()
    }
}

#[async_trait]
impl KeyRecordStore for InMemoryKeyStore {
    async fn insert(&self, record: QuantumKeyRecord) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.records.contains_key(record.key_id()) {
            return Err(QuMailError::Storage(format!(
                "duplicate key id {}",
                record.key_id()
            )));
        }

        let key_id = record.key_id().to_string();
        let pair = (record.owner_id().to_string(), record.peer_identity().to_string());
        inner.by_pair.entry(pair).or_default().push(key_id.clone());
        inner.records.insert(key_id, record);
        Ok(())
    }

    async fn get(&self, key_id: &str) -> Result<Option<QuantumKeyRecord>> {
        Ok(self.inner.read().await.records.get(key_id).cloned())
    }

    async fn find_usable(
        &self,
        owner_id: &str,
        peer_identity: &str,
        min_length: usize,
        now: DateTime<Utc>,
    ) -> Result<Option<QuantumKeyRecord>> {
        let inner = self.inner.read().await;
        let pair = (owner_id.to_string(), peer_identity.to_string());
        let Some(ids) = inner.by_pair.get(&pair) else {
            return Ok(None);
        };

        Ok(ids
            .iter()
            .filter_map(|id| inner.records.get(id))
            .filter(|record| record.is_usable(now) && record.requested_length() >= min_length)
            .min_by_key(|record| record.created_at())
            .cloned())
    }

    async fn list_for_owner(&self, owner_id: &str) -> Result<Vec<QuantumKeyRecord>> {
        let inner = self.inner.read().await;
        Ok(inner
            .records
            .values()
            .filter(|record| record.owner_id() == owner_id)
            .cloned()
            .collect())
    }

    async fn consume_if_usable(&self, key_id: &str, now: DateTime<Utc>) -> Result<ConsumeOutcome> {
        let mut inner = self.inner.write().await;
        let Some(record) = inner.records.get_mut(key_id) else {
            return Ok(ConsumeOutcome::NotFound);
        };

        Ok(match record.status(now) {
            KeyStatus::Usable => {
                record.mark_consumed(now)?;
                ConsumeOutcome::Consumed(record.clone())
            }
            KeyStatus::Consumed => ConsumeOutcome::AlreadyConsumed,
            KeyStatus::Expired => ConsumeOutcome::Expired,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_record::tests::sample_record;
    use chrono::Duration;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_duplicate_key_id_rejected() {
        let store = InMemoryKeyStore::new();
        let now = Utc::now();
        store.insert(sample_record("k1", now)).await.unwrap();
        assert!(matches!(
            store.insert(sample_record("k1", now)).await,
            Err(QuMailError::Storage(_))
        ));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_find_usable_prefers_oldest_and_skips_expired() {
        let store = InMemoryKeyStore::new();
        let now = Utc::now();
        store.insert(sample_record("expired", now - Duration::hours(30))).await.unwrap();
        store.insert(sample_record("newer", now - Duration::minutes(5))).await.unwrap();
        store.insert(sample_record("older", now - Duration::hours(2))).await.unwrap();

        let found = store
            .find_usable("alice", "bob@example.com", 32, now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.key_id(), "older");

        assert!(store
            .find_usable("alice", "bob@example.com", 65, now)
            .await
            .unwrap()
            .is_none());
        assert!(store
            .find_usable("alice", "carol@example.com", 1, now)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_consume_outcomes() {
        let store = InMemoryKeyStore::new();
        let now = Utc::now();
        store.insert(sample_record("k1", now)).await.unwrap();
        store.insert(sample_record("old", now - Duration::hours(48))).await.unwrap();

        assert!(matches!(
            store.consume_if_usable("k1", now).await.unwrap(),
            ConsumeOutcome::Consumed(record) if record.is_used()
        ));
        assert_eq!(
            store.consume_if_usable("k1", now).await.unwrap(),
            ConsumeOutcome::AlreadyConsumed
        );
        assert_eq!(
            store.consume_if_usable("old", now).await.unwrap(),
            ConsumeOutcome::Expired
        );
        assert_eq!(
            store.consume_if_usable("missing", now).await.unwrap(),
            ConsumeOutcome::NotFound
        );
        assert!(store.get("k1").await.unwrap().unwrap().is_used());
    }

    #[tokio::test]
    async fn test_concurrent_consume_single_winner() {
        let store = Arc::new(InMemoryKeyStore::new());
        let now = Utc::now();
        store.insert(sample_record("race", now)).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.consume_if_usable("race", now).await.unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), ConsumeOutcome::Consumed(_)) {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let store = InMemoryKeyStore::new();
        let now = Utc::now();
        store.insert(sample_record("live", now)).await.unwrap();
        store.insert(sample_record("dead", now - Duration::hours(25))).await.unwrap();

        assert_eq!(store.purge_expired(now).await, 1);
        assert!(store.get("dead").await.unwrap().is_none());
        assert!(store.get("live").await.unwrap().is_some());
    }
}

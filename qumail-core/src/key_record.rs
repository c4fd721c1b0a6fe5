//! Quantum key records
//!
//! A record is issued once, then either consumed (single use) or left to
//! expire. Expiry is evaluated at read time against the caller's clock; no
//! sweep runs in the background.

use crate::encoding::base64_bytes;
use crate::{QuMailError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default validity window of a freshly issued key
pub const DEFAULT_KEY_VALIDITY_HOURS: i64 = 24;

/// Where the key material came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySource {
    /// Issued by a real Key Manager
    KeyManager,
    /// Fabricated locally because the Key Manager was unreachable
    Simulator,
}

impl KeySource {
    /// Audit tag
    pub const fn as_str(self) -> &'static str {
        match self {
            KeySource::KeyManager => "key_manager",
            KeySource::Simulator => "simulator",
        }
    }
}

impl fmt::Display for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of key delivered by the Key Manager
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyType {
    /// Shared symmetric material, consumed on first retrieval
    #[default]
    Symmetric,
    /// Asymmetric material, readable while unexpired
    Asymmetric,
}

impl KeyType {
    /// Parse the Key Manager's `type` metadata; unknown values are symmetric
    pub fn from_metadata(value: Option<&str>) -> Self {
        match value {
            Some(t) if t.eq_ignore_ascii_case("asymmetric") => KeyType::Asymmetric,
            _ => KeyType::Symmetric,
        }
    }

    /// Whether retrieving the material consumes the record
    pub const fn consumed_on_read(self) -> bool {
        matches!(self, KeyType::Symmetric)
    }
}

/// Persisted lifecycle state. `Expired` is never stored; see [`KeyStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum KeyState {
    /// Issued and not yet consumed
    Issued,
    /// Consumed at `used_at`; terminal
    Consumed {
        /// Consumption time
        used_at: DateTime<Utc>,
    },
}

/// Status of a record at a given instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    /// Unused and unexpired
    Usable,
    /// Single use already spent
    Consumed,
    /// Validity window elapsed while unused
    Expired,
}

/// Key bytes after the storage-protection transform
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProtectedKeyMaterial(#[serde(with = "base64_bytes")] Vec<u8>);

impl ProtectedKeyMaterial {
    /// Wrap already protected bytes
    pub fn from_protected(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Protected bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Length of the protected (and underlying) key material
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no material is held
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for ProtectedKeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProtectedKeyMaterial([REDACTED; {}])", self.0.len())
    }
}

/// Parameters for issuing a record
#[derive(Debug, Clone)]
pub struct NewKeyRecord {
    pub key_id: String,
    pub owner_id: String,
    pub peer_identity: String,
    pub key_material_at_rest: ProtectedKeyMaterial,
    pub requested_length: usize,
    pub key_type: KeyType,
    pub source: KeySource,
    pub sequence_number: u64,
    pub created_at: DateTime<Utc>,
    pub validity: Duration,
}

/// Quantum key record as held by the key store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantumKeyRecord {
    key_id: String,
    owner_id: String,
    peer_identity: String,
    key_material_at_rest: ProtectedKeyMaterial,
    requested_length: usize,
    key_type: KeyType,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    state: KeyState,
    source: KeySource,
    sequence_number: u64,
}

impl QuantumKeyRecord {
    /// Issue a new record in the `Issued` state
    pub fn issue(new: NewKeyRecord) -> Result<Self> {
        if new.key_id.is_empty() {
            return Err(QuMailError::InvalidKeyRequest("key id must not be empty".to_string()));
        }
        if new.requested_length == 0 {
            return Err(QuMailError::InvalidKeyRequest(
                "requested length must be positive".to_string(),
            ));
        }
        if new.key_material_at_rest.len() < new.requested_length {
            return Err(QuMailError::InvalidKeyRequest(format!(
                "{} bytes of key material cannot cover {} requested bytes",
                new.key_material_at_rest.len(),
                new.requested_length
            )));
        }
        if new.validity <= Duration::zero() {
            return Err(QuMailError::InvalidKeyRequest(
                "validity window must be positive".to_string(),
            ));
        }

        Ok(Self {
            expires_at: new.created_at + new.validity,
            key_id: new.key_id,
            owner_id: new.owner_id,
            peer_identity: new.peer_identity,
            key_material_at_rest: new.key_material_at_rest,
            requested_length: new.requested_length,
            key_type: new.key_type,
            created_at: new.created_at,
            state: KeyState::Issued,
            source: new.source,
            sequence_number: new.sequence_number,
        })
    }

    /// Globally unique key identifier
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Owning party
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Counterpart this key is scoped to
    pub fn peer_identity(&self) -> &str {
        &self.peer_identity
    }

    /// Protected key bytes; unprotect with [`crate::StorageProtector`]
    pub fn key_material_at_rest(&self) -> &ProtectedKeyMaterial {
        &self.key_material_at_rest
    }

    /// Bytes of key material guaranteed available
    pub fn requested_length(&self) -> usize {
        self.requested_length
    }

    /// Kind of key
    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    /// Issuance time
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// End of the validity window
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Persisted lifecycle state
    pub fn state(&self) -> KeyState {
        self.state
    }

    /// Provenance
    pub fn source(&self) -> KeySource {
        self.source
    }

    /// Ordering hint from the Key Manager
    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    /// Whether the single use has been spent
    pub fn is_used(&self) -> bool {
        matches!(self.state, KeyState::Consumed { .. })
    }

    /// When the single use was spent
    pub fn used_at(&self) -> Option<DateTime<Utc>> {
        match self.state {
            KeyState::Consumed { used_at } => Some(used_at),
            KeyState::Issued => None,
        }
    }

    /// Whether the validity window has elapsed at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Usable iff unused and `now < expires_at`
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        !self.is_used() && !self.is_expired(now)
    }

    /// Status at `now`
    pub fn status(&self, now: DateTime<Utc>) -> KeyStatus {
        if self.is_used() {
            KeyStatus::Consumed
        } else if self.is_expired(now) {
            KeyStatus::Expired
        } else {
            KeyStatus::Usable
        }
    }

    /// Transition `Issued -> Consumed`.
    ///
    /// Only the key store calls this, under the same lock as the usability
    /// check, so the flip is a single conditional write.
    pub fn mark_consumed(&mut self, now: DateTime<Utc>) -> Result<()> {
        match self.status(now) {
            KeyStatus::Usable => {
                self.state = KeyState::Consumed { used_at: now };
                Ok(())
            }
            KeyStatus::Consumed | KeyStatus::Expired => {
                Err(QuMailError::KeyExpiredOrConsumed(self.key_id.clone()))
            }
        }
    }

    /// Outward view without key material
    pub fn summary(&self, now: DateTime<Utc>) -> KeySummary {
        KeySummary {
            key_id: self.key_id.clone(),
            peer_identity: self.peer_identity.clone(),
            key_length: self.requested_length,
            key_type: self.key_type,
            created_at: self.created_at,
            expires_at: self.expires_at,
            used_at: self.used_at(),
            is_expired: self.is_expired(now),
            is_used: self.is_used(),
            is_valid: self.is_usable(now),
            source: self.source,
        }
    }
}

/// Record metadata safe to return across a boundary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySummary {
    pub key_id: String,
    pub peer_identity: String,
    pub key_length: usize,
    pub key_type: KeyType,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub is_expired: bool,
    pub is_used: bool,
    pub is_valid: bool,
    pub source: KeySource,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_record(key_id: &str, created_at: DateTime<Utc>) -> QuantumKeyRecord {
        QuantumKeyRecord::issue(NewKeyRecord {
            key_id: key_id.to_string(),
            owner_id: "alice".to_string(),
            peer_identity: "bob@example.com".to_string(),
            key_material_at_rest: ProtectedKeyMaterial::from_protected(vec![7u8; 64]),
            requested_length: 64,
            key_type: KeyType::Symmetric,
            source: KeySource::Simulator,
            sequence_number: 1,
            created_at,
            validity: Duration::hours(DEFAULT_KEY_VALIDITY_HOURS),
        })
        .unwrap()
    }

    #[test]
    fn test_expiry_is_created_plus_validity() {
        let now = Utc::now();
        let record = sample_record("k1", now);
        assert_eq!(record.expires_at(), now + Duration::hours(24));
        assert_eq!(record.status(now), KeyStatus::Usable);
        assert_eq!(record.status(now + Duration::hours(24)), KeyStatus::Expired);
    }

    #[test]
    fn test_consumption_is_terminal() {
        let now = Utc::now();
        let mut record = sample_record("k1", now);
        record.mark_consumed(now).unwrap();

        assert!(record.is_used());
        assert_eq!(record.used_at(), Some(now));
        assert!(!record.is_usable(now));
        assert!(matches!(
            record.mark_consumed(now),
            Err(QuMailError::KeyExpiredOrConsumed(_))
        ));
        assert_eq!(record.status(now + Duration::days(2)), KeyStatus::Consumed);
    }

    #[test]
    fn test_expired_record_cannot_be_consumed() {
        let created = Utc::now() - Duration::hours(25);
        let mut record = sample_record("old", created);
        assert!(record.mark_consumed(Utc::now()).is_err());
        assert!(!record.is_used());
    }

    #[test]
    fn test_issue_validation() {
        let mut new = NewKeyRecord {
            key_id: "k".to_string(),
            owner_id: "alice".to_string(),
            peer_identity: "bob@example.com".to_string(),
            key_material_at_rest: ProtectedKeyMaterial::from_protected(vec![0u8; 8]),
            requested_length: 16,
            key_type: KeyType::Symmetric,
            source: KeySource::KeyManager,
            sequence_number: 0,
            created_at: Utc::now(),
            validity: Duration::hours(1),
        };
        assert!(QuantumKeyRecord::issue(new.clone()).is_err());

        new.requested_length = 0;
        assert!(QuantumKeyRecord::issue(new.clone()).is_err());

        new.requested_length = 8;
        assert!(QuantumKeyRecord::issue(new).is_ok());
    }

    #[test]
    fn test_summary_hides_material() {
        let record = sample_record("k1", Utc::now());
        let json = serde_json::to_string(&record.summary(Utc::now())).unwrap();
        assert!(json.contains("\"is_valid\":true"));
        assert!(json.contains("\"source\":\"simulator\""));
        assert!(!json.contains("BwcH"));
        assert!(!format!("{record:?}").contains("7, 7"));
    }

    #[test]
    fn test_key_type_from_metadata() {
        assert_eq!(KeyType::from_metadata(Some("asymmetric")), KeyType::Asymmetric);
        assert_eq!(KeyType::from_metadata(Some("symmetric")), KeyType::Symmetric);
        assert_eq!(KeyType::from_metadata(None), KeyType::Symmetric);
    }
}

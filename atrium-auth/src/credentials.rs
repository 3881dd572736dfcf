//! Credential records and the store they live in.
//!
//! Records are keyed by normalized email (trimmed, lower-cased), so two
//! registrations that differ only in case collide.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A registered user. The password is only ever held as an Argon2 PHC string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub id: Uuid,
    pub name: String,
    /// Normalized email, also the store key.
    pub email: String,
    pub password_hash: String,
    /// Seconds since the Unix epoch.
    pub created_at: u64,
}

impl CredentialRecord {
    pub fn new(name: impl Into<String>, email: &str, password_hash: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            email: normalize_email(email),
            password_hash,
            created_at: SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        }
    }
}

/// Canonical form used for lookups and storage.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Storage errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A record with this email already exists
    Duplicate(String),
    /// The backing store failed
    Backend(String),
    /// Serialization failed
    Serialization(String),
    /// Deserialization failed
    Deserialization(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Duplicate(email) => write!(f, "Duplicate email: {email}"),
            StoreError::Backend(e) => write!(f, "Store backend error: {e}"),
            StoreError::Serialization(e) => write!(f, "Serialization error: {e}"),
            StoreError::Deserialization(e) => write!(f, "Deserialization error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Persistence boundary for credential records.
///
/// Callers pass already-normalized emails; implementations key by
/// [`CredentialRecord::email`] as given.
pub trait CredentialStore: Send + Sync {
    fn find_by_email(&self, email: &str) -> Result<Option<CredentialRecord>, StoreError>;

    /// Insert a new record. Fails with [`StoreError::Duplicate`] if the
    /// email is taken; an existing record is never overwritten.
    fn create(&self, record: CredentialRecord) -> Result<CredentialRecord, StoreError>;

    /// Number of stored records.
    fn len(&self) -> Result<usize, StoreError>;

    fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

/// In-process store, used when no database path is configured.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    records: RwLock<HashMap<String, CredentialRecord>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Backend("credential map lock poisoned".to_string())
}

impl CredentialStore for MemoryCredentialStore {
    fn find_by_email(&self, email: &str) -> Result<Option<CredentialRecord>, StoreError> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(records.get(email).cloned())
    }

    fn create(&self, record: CredentialRecord) -> Result<CredentialRecord, StoreError> {
        let mut records = self.records.write().map_err(poisoned)?;
        if records.contains_key(&record.email) {
            return Err(StoreError::Duplicate(record.email));
        }
        records.insert(record.email.clone(), record.clone());
        Ok(record)
    }

    fn len(&self) -> Result<usize, StoreError> {
        Ok(self.records.read().map_err(poisoned)?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  Alice@Example.COM "), "alice@example.com");
        assert_eq!(normalize_email("bob@x.io"), "bob@x.io");
    }

    #[test]
    fn test_record_normalizes_email() {
        let record = CredentialRecord::new("Alice", "Alice@Example.com", "hash".into());
        assert_eq!(record.email, "alice@example.com");
        assert!(record.created_at > 0);
    }

    #[test]
    fn test_memory_store_create_and_find() {
        let store = MemoryCredentialStore::new();
        assert!(store.is_empty().unwrap());

        let record = CredentialRecord::new("Alice", "alice@example.com", "hash".into());
        let created = store.create(record.clone()).unwrap();
        assert_eq!(created, record);

        assert_eq!(store.find_by_email("alice@example.com").unwrap(), Some(record));
        assert_eq!(store.find_by_email("bob@example.com").unwrap(), None);
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_memory_store_rejects_duplicate() {
        let store = MemoryCredentialStore::new();
        let first = CredentialRecord::new("Alice", "alice@example.com", "h1".into());
        store.create(first.clone()).unwrap();

        let second = CredentialRecord::new("Impostor", "ALICE@example.com", "h2".into());
        let err = store.create(second).unwrap_err();
        assert_eq!(err, StoreError::Duplicate("alice@example.com".into()));

        // Original record untouched
        assert_eq!(store.find_by_email("alice@example.com").unwrap(), Some(first));
    }
}

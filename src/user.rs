//! Merchant User Records and Lookup Criteria
//!
//! A [`UserRecord`] is loaded fresh from the [`UserStore`] for every
//! authentication attempt and never mutated afterwards. Lookups are described
//! by [`UserCriteria`], a set of equality filters keyed by field name.
//!
//! # Filter semantics
//!
//! Filters on distinct keys are conjunctive. Setting a key that is already
//! present replaces the previous value, so when criteria expanders run in
//! sequence the last one to touch a key wins.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreError;

/// Filter key for the login identity
pub const USERNAME_FIELD: &str = "username";

/// Filter key for the account status
pub const STATUS_FIELD: &str = "status";

// ============================================================================
// User Record
// ============================================================================

/// Account status of a merchant user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    /// May log in
    Active,
    /// Blocked by an administrator
    Blocked,
    /// Soft deleted
    Deleted,
}

impl UserStatus {
    /// Status as stored and filtered on
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Blocked => "blocked",
            Self::Deleted => "deleted",
        }
    }
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A merchant user as persisted in the user store.
///
/// The password hash is never serialized, so principals can be stored in
/// session data without carrying hash material.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Unique login identity
    pub username: String,

    /// Argon2 PHC string of the secret
    #[serde(skip_serializing, default)]
    pub password_hash: String,

    /// Account status
    pub status: UserStatus,

    /// Profile attributes (merchant reference, names, locale, ...)
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
}

impl UserRecord {
    /// Create an active record
    pub fn new(username: impl Into<String>, password_hash: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password_hash: password_hash.into(),
            status: UserStatus::Active,
            attributes: BTreeMap::new(),
        }
    }

    /// Builder: set status
    pub fn with_status(mut self, status: UserStatus) -> Self {
        self.status = status;
        self
    }

    /// Builder: set a profile attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Whether the account may log in
    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }

    /// Get a profile attribute
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Value of a filterable field, as compared by [`UserCriteria::matches`]
    fn field(&self, key: &str) -> Option<Value> {
        match key {
            USERNAME_FIELD => Some(Value::String(self.username.clone())),
            STATUS_FIELD => Some(Value::String(self.status.as_str().to_string())),
            other => self.attributes.get(other).cloned(),
        }
    }
}

impl fmt::Debug for UserRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserRecord")
            .field("username", &self.username)
            .field("password_hash", &"[REDACTED]")
            .field("status", &self.status)
            .field("attributes", &self.attributes)
            .finish()
    }
}

// ============================================================================
// Lookup Criteria
// ============================================================================

/// Equality filters used to look up a single user record
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserCriteria {
    filters: BTreeMap<String, Value>,
}

impl UserCriteria {
    /// Criteria seeded with the login identity
    pub fn for_identity(identity: &str) -> Self {
        Self::default().with_filter(USERNAME_FIELD, identity)
    }

    /// Set a filter, replacing any previous value for the same key
    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.insert(key.into(), value.into());
        self
    }

    /// Remove a filter
    pub fn without_filter(mut self, key: &str) -> Self {
        self.filters.remove(key);
        self
    }

    /// Current value of a filter
    pub fn filter(&self, key: &str) -> Option<&Value> {
        self.filters.get(key)
    }

    /// All filters in key order
    pub fn filters(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.filters.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// The identity filter, if still present
    pub fn identity(&self) -> Option<&str> {
        self.filter(USERNAME_FIELD).and_then(Value::as_str)
    }

    /// Whether a record satisfies every filter
    pub fn matches(&self, record: &UserRecord) -> bool {
        self.filters
            .iter()
            .all(|(key, expected)| record.field(key).as_ref() == Some(expected))
    }
}

// ============================================================================
// User Store
// ============================================================================

/// Backing store for merchant user records.
///
/// Implement this over the application's database. Lookups are single
/// synchronous reads; the pipeline never retries a failed read.
pub trait UserStore: Send + Sync {
    /// Return the record matching all filters, if any
    fn find_one(&self, criteria: &UserCriteria) -> Result<Option<UserRecord>, StoreError>;
}

/// In-memory user store, keyed by username.
///
/// Suitable for tests and single-instance deployments seeded at startup.
#[derive(Debug, Default)]
pub struct InMemoryUserStore {
    users: RwLock<HashMap<String, UserRecord>>,
}

impl InMemoryUserStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record
    pub fn upsert(&self, record: UserRecord) {
        self.users.write().insert(record.username.clone(), record);
    }

    /// Remove a record, returning it if present
    pub fn remove(&self, username: &str) -> Option<UserRecord> {
        self.users.write().remove(username)
    }

    /// Get a record by username without filtering
    pub fn get(&self, username: &str) -> Option<UserRecord> {
        self.users.read().get(username).cloned()
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.users.read().len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.users.read().is_empty()
    }
}

impl UserStore for InMemoryUserStore {
    fn find_one(&self, criteria: &UserCriteria) -> Result<Option<UserRecord>, StoreError> {
        let users = self.users.read();

        // Fast path when the identity filter is intact
        if let Some(identity) = criteria.identity() {
            return Ok(users
                .get(identity)
                .filter(|record| criteria.matches(record))
                .cloned());
        }

        Ok(users.values().find(|record| criteria.matches(record)).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn alice() -> UserRecord {
        UserRecord::new("alice@merchant.test", "$argon2id$hash")
            .with_attribute("merchant_reference", "MER000001")
            .with_attribute("tenant", "de")
    }

    #[test]
    fn test_criteria_last_write_wins() {
        let criteria = UserCriteria::for_identity("alice")
            .with_filter("tenant", "de")
            .with_filter("tenant", "at");

        assert_eq!(criteria.filter("tenant"), Some(&json!("at")));
        assert_eq!(criteria.filters().count(), 2);
    }

    #[test]
    fn test_criteria_matches_all_filters() {
        let record = alice();

        assert!(UserCriteria::for_identity("alice@merchant.test").matches(&record));
        assert!(UserCriteria::for_identity("alice@merchant.test")
            .with_filter(STATUS_FIELD, "active")
            .with_filter("tenant", "de")
            .matches(&record));
        assert!(!UserCriteria::for_identity("alice@merchant.test")
            .with_filter("tenant", "at")
            .matches(&record));
        assert!(!UserCriteria::for_identity("alice@merchant.test")
            .with_filter("missing", "x")
            .matches(&record));
    }

    #[test]
    fn test_store_lookup() {
        let store = InMemoryUserStore::new();
        store.upsert(alice());
        store.upsert(UserRecord::new("bob@merchant.test", "h").with_status(UserStatus::Blocked));

        let found = store
            .find_one(&UserCriteria::for_identity("alice@merchant.test"))
            .unwrap();
        assert_eq!(found.map(|u| u.username), Some("alice@merchant.test".to_string()));

        let blocked = store
            .find_one(&UserCriteria::for_identity("bob@merchant.test").with_filter(STATUS_FIELD, "active"))
            .unwrap();
        assert!(blocked.is_none());

        let by_attribute = store
            .find_one(&UserCriteria::default().with_filter("merchant_reference", "MER000001"))
            .unwrap();
        assert!(by_attribute.is_some());
    }

    #[test]
    fn test_store_upsert_replaces() {
        let store = InMemoryUserStore::new();
        store.upsert(alice());
        store.upsert(alice().with_status(UserStatus::Deleted));

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("alice@merchant.test").unwrap().status, UserStatus::Deleted);
        assert!(store.remove("alice@merchant.test").is_some());
        assert!(store.is_empty());
    }

    #[test]
    fn test_record_serialization_drops_hash() {
        let json = serde_json::to_value(alice()).unwrap();
        assert!(json.get("password_hash").is_none());
        assert_eq!(json["status"], "active");

        let back: UserRecord = serde_json::from_value(json).unwrap();
        assert!(back.password_hash.is_empty());
        assert_eq!(back.username, "alice@merchant.test");
    }

    #[test]
    fn test_debug_redacts_hash() {
        let debug = format!("{:?}", alice());
        assert!(!debug.contains("$argon2id$hash"));
        assert!(debug.contains("[REDACTED]"));
    }
}

//! Backing store contract.
//!
//! Defines the opaque object store every registry reads and writes through:
//! single-item create/get/list/update/delete with optional TTL and
//! resource-version based optimistic concurrency.

use crate::errors::RegistryError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type Result<T> = std::result::Result<T, RegistryError>;

/// Kind-qualified name of a stored item
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    /// Storage path of the resource kind, e.g. `/oauth/oauthaccesstokens`
    pub kind: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// Opaque optimistic-concurrency marker.
///
/// Versions are only ever compared for equality by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceVersion(u64);

impl ResourceVersion {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ResourceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Persisted item shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredObject {
    pub key: ObjectKey,
    pub payload: serde_json::Value,
    pub resource_version: ResourceVersion,
    /// Absent for items that never expire
    pub expires_at: Option<DateTime<Utc>>,
}

impl StoredObject {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

/// Expiry timestamp for an item created at `now` with `ttl`.
///
/// A missing or non-positive TTL means the item never expires.
pub fn expiry_for(now: DateTime<Utc>, ttl: Option<Duration>) -> Option<DateTime<Utc>> {
    ttl.filter(|ttl| *ttl > Duration::zero())
        .map(|ttl| now + ttl)
}

/// Transactional object store keyed by kind and name.
///
/// Every method is atomic for the single item it addresses. Expired items are
/// invisible to `get`, `list`, `update` and `delete` even before they are
/// reclaimed, and do not block `create` of the same name.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Create an item, failing with `AlreadyExists` if the name is taken
    async fn create(
        &self,
        key: &ObjectKey,
        payload: serde_json::Value,
        ttl: Option<Duration>,
    ) -> Result<StoredObject>;

    /// Retrieve an item, failing with `NotFound` when absent or expired
    async fn get(&self, key: &ObjectKey) -> Result<StoredObject>;

    /// List every live item of a kind, ordered by name
    async fn list(&self, kind: &str) -> Result<Vec<StoredObject>>;

    /// Replace the payload if `expected_version` matches, keeping the expiry
    async fn update(
        &self,
        key: &ObjectKey,
        expected_version: ResourceVersion,
        payload: serde_json::Value,
    ) -> Result<StoredObject>;

    /// Delete an item and return it; with `expected_version`, fail `Conflict` on mismatch
    async fn delete(
        &self,
        key: &ObjectKey,
        expected_version: Option<ResourceVersion>,
    ) -> Result<StoredObject>;

    /// Reclaim expired items of a kind, returning how many were removed
    async fn purge_expired(&self, kind: &str) -> Result<usize>;
}

pub(crate) fn not_found(key: &ObjectKey) -> RegistryError {
    RegistryError::NotFound(key.to_string())
}

pub(crate) fn conflict(key: &ObjectKey) -> RegistryError {
    RegistryError::Conflict(format!("{} was modified concurrently", key))
}

pub(crate) fn already_exists(key: &ObjectKey) -> RegistryError {
    RegistryError::AlreadyExists(key.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_for_non_positive_ttl_is_none() {
        let now = Utc::now();
        assert_eq!(expiry_for(now, None), None);
        assert_eq!(expiry_for(now, Some(Duration::zero())), None);
        assert_eq!(
            expiry_for(now, Some(Duration::minutes(5))),
            Some(now + Duration::minutes(5))
        );
    }

    #[test]
    fn test_stored_object_shape_round_trips() {
        let object = StoredObject {
            key: ObjectKey::new("/oauth/oauthclients", "web"),
            payload: serde_json::json!({"name": "web", "redirect_uris": ["https://a/cb"]}),
            resource_version: ResourceVersion::new(42),
            expires_at: Some(Utc::now()),
        };
        let encoded = serde_json::to_string(&object).unwrap();
        let decoded: StoredObject = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, object);
    }
}

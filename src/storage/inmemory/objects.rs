//! In-memory object store implementation

use crate::errors::RegistryError;
use crate::storage::clock::{Clock, SystemClock};
use crate::storage::traits::*;
use async_trait::async_trait;
use chrono::Duration;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct Objects {
    items: HashMap<ObjectKey, StoredObject>,
    /// Last issued resource version, shared across kinds like an etcd revision
    revision: u64,
}

impl Objects {
    fn next_version(&mut self) -> ResourceVersion {
        self.revision += 1;
        ResourceVersion::new(self.revision)
    }

    /// Live item for `key`; expired items are dropped on access
    fn live(&mut self, key: &ObjectKey, clock: &dyn Clock) -> Option<&mut StoredObject> {
        let now = clock.now();
        if self.items.get(key).is_some_and(|item| item.is_expired_at(now)) {
            self.items.remove(key);
        }
        self.items.get_mut(key)
    }
}

/// In-memory implementation of [`ObjectStore`]
pub struct MemoryObjectStore {
    objects: Mutex<Objects>,
    clock: Arc<dyn Clock>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            objects: Mutex::new(Objects::default()),
            clock,
        }
    }

    fn objects(&self) -> Result<MutexGuard<'_, Objects>> {
        self.objects
            .lock()
            .map_err(|e| RegistryError::Unavailable(format!("Lock error: {}", e)))
    }
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn create(
        &self,
        key: &ObjectKey,
        payload: serde_json::Value,
        ttl: Option<Duration>,
    ) -> Result<StoredObject> {
        let mut objects = self.objects()?;
        if objects.live(key, self.clock.as_ref()).is_some() {
            return Err(already_exists(key));
        }

        let stored = StoredObject {
            key: key.clone(),
            payload,
            resource_version: objects.next_version(),
            expires_at: expiry_for(self.clock.now(), ttl),
        };
        objects.items.insert(key.clone(), stored.clone());
        Ok(stored)
    }

    async fn get(&self, key: &ObjectKey) -> Result<StoredObject> {
        let mut objects = self.objects()?;
        objects
            .live(key, self.clock.as_ref())
            .map(|item| item.clone())
            .ok_or_else(|| not_found(key))
    }

    async fn list(&self, kind: &str) -> Result<Vec<StoredObject>> {
        let objects = self.objects()?;
        let now = self.clock.now();
        let mut items: Vec<_> = objects
            .items
            .values()
            .filter(|item| item.key.kind == kind && !item.is_expired_at(now))
            .cloned()
            .collect();
        items.sort_by(|a, b| a.key.name.cmp(&b.key.name));
        Ok(items)
    }

    async fn update(
        &self,
        key: &ObjectKey,
        expected_version: ResourceVersion,
        payload: serde_json::Value,
    ) -> Result<StoredObject> {
        let mut objects = self.objects()?;
        let current = objects
            .live(key, self.clock.as_ref())
            .map(|item| item.resource_version)
            .ok_or_else(|| not_found(key))?;
        if current != expected_version {
            return Err(conflict(key));
        }

        let version = objects.next_version();
        let item = objects.items.get_mut(key).ok_or_else(|| not_found(key))?;
        item.payload = payload;
        item.resource_version = version;
        Ok(item.clone())
    }

    async fn delete(
        &self,
        key: &ObjectKey,
        expected_version: Option<ResourceVersion>,
    ) -> Result<StoredObject> {
        let mut objects = self.objects()?;
        let current = objects
            .live(key, self.clock.as_ref())
            .map(|item| item.resource_version)
            .ok_or_else(|| not_found(key))?;
        if expected_version.is_some_and(|expected| expected != current) {
            return Err(conflict(key));
        }
        objects.items.remove(key).ok_or_else(|| not_found(key))
    }

    async fn purge_expired(&self, kind: &str) -> Result<usize> {
        let mut objects = self.objects()?;
        let now = self.clock.now();
        let initial_count = objects.items.len();
        objects
            .items
            .retain(|key, item| key.kind != kind || !item.is_expired_at(now));
        Ok(initial_count - objects.items.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::clock::ManualClock;
    use chrono::Utc;
    use serde_json::json;

    fn key(name: &str) -> ObjectKey {
        ObjectKey::new("/oauth/things", name)
    }

    #[tokio::test]
    async fn test_create_rejects_live_duplicate() {
        let store = MemoryObjectStore::new();
        store.create(&key("a"), json!(1), None).await.unwrap();

        let err = store.create(&key("a"), json!(2), None).await.unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyExists(_)));
        assert_eq!(store.get(&key("a")).await.unwrap().payload, json!(1));
    }

    #[tokio::test]
    async fn test_expired_item_is_invisible_and_name_reusable() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = MemoryObjectStore::with_clock(clock.clone());
        store
            .create(&key("a"), json!(1), Some(Duration::minutes(10)))
            .await
            .unwrap();

        clock.advance(Duration::minutes(10));
        assert!(matches!(
            store.get(&key("a")).await,
            Err(RegistryError::NotFound(_))
        ));
        assert!(store.list("/oauth/things").await.unwrap().is_empty());

        store.create(&key("a"), json!(2), None).await.unwrap();
        assert_eq!(store.get(&key("a")).await.unwrap().payload, json!(2));
    }

    #[tokio::test]
    async fn test_update_requires_matching_version() {
        let store = MemoryObjectStore::new();
        let created = store.create(&key("a"), json!(1), None).await.unwrap();

        let updated = store
            .update(&key("a"), created.resource_version, json!(2))
            .await
            .unwrap();
        assert_ne!(updated.resource_version, created.resource_version);

        let err = store
            .update(&key("a"), created.resource_version, json!(3))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Conflict(_)));
        assert_eq!(store.get(&key("a")).await.unwrap().payload, json!(2));
    }

    #[tokio::test]
    async fn test_update_keeps_expiry() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = MemoryObjectStore::with_clock(clock.clone());
        let created = store
            .create(&key("a"), json!(1), Some(Duration::minutes(5)))
            .await
            .unwrap();
        let updated = store
            .update(&key("a"), created.resource_version, json!(2))
            .await
            .unwrap();
        assert_eq!(updated.expires_at, created.expires_at);
    }

    #[tokio::test]
    async fn test_delete_with_precondition() {
        let store = MemoryObjectStore::new();
        let created = store.create(&key("a"), json!(1), None).await.unwrap();

        let err = store
            .delete(&key("a"), Some(ResourceVersion::new(created.resource_version.as_u64() + 100)))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Conflict(_)));

        let deleted = store
            .delete(&key("a"), Some(created.resource_version))
            .await
            .unwrap();
        assert_eq!(deleted.payload, json!(1));

        let err = store.delete(&key("a"), None).await.unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_purge_only_touches_expired_items_of_kind() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = MemoryObjectStore::with_clock(clock.clone());
        let other = ObjectKey::new("/oauth/others", "x");
        store
            .create(&key("short"), json!(1), Some(Duration::seconds(30)))
            .await
            .unwrap();
        store.create(&key("forever"), json!(2), None).await.unwrap();
        store
            .create(&other, json!(3), Some(Duration::seconds(30)))
            .await
            .unwrap();

        clock.advance(Duration::minutes(1));
        assert_eq!(store.purge_expired("/oauth/things").await.unwrap(), 1);
        assert_eq!(store.list("/oauth/things").await.unwrap().len(), 1);
        assert_eq!(store.purge_expired("/oauth/others").await.unwrap(), 1);
    }
}

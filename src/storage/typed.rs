//! Typed facade over an [`ObjectStore`].
//!
//! Serializes entities to JSON payloads and qualifies names with the
//! configured storage prefix for their kind.

use crate::errors::RegistryError;
use crate::storage::traits::*;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::sync::Arc;

/// An entity persisted under its own name
pub trait StoredResource: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Storage path segment for this kind
    const KIND: &'static str;

    /// Names are bearer credentials and must stay out of error messages
    const SECRET_NAME: bool = false;

    fn name(&self) -> &str;
}

/// A stored entity together with its concurrency marker
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub resource: T,
    pub resource_version: ResourceVersion,
    pub expires_at: Option<DateTime<Utc>>,
}

pub struct TypedStore<T> {
    objects: Arc<dyn ObjectStore>,
    kind: String,
    _resource: PhantomData<fn() -> T>,
}

impl<T: StoredResource> TypedStore<T> {
    pub fn new(objects: Arc<dyn ObjectStore>, prefix: &str) -> Self {
        Self {
            objects,
            kind: format!("{}/{}", prefix.trim_end_matches('/'), T::KIND),
            _resource: PhantomData,
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn key(&self, name: &str) -> ObjectKey {
        ObjectKey::new(self.kind.clone(), name)
    }

    pub async fn create(&self, resource: &T, ttl: Option<Duration>) -> Result<Versioned<T>> {
        let key = self.key(resource.name());
        let stored = self
            .objects
            .create(&key, encode(resource)?, ttl)
            .await
            .map_err(|e| redact::<T>(e, &key.name))?;
        decode(stored)
    }

    pub async fn get(&self, name: &str) -> Result<Versioned<T>> {
        let stored = self
            .objects
            .get(&self.key(name))
            .await
            .map_err(|e| redact::<T>(e, name))?;
        decode(stored)
    }

    pub async fn list<F>(&self, predicate: F) -> Result<Vec<Versioned<T>>>
    where
        F: Fn(&T) -> bool,
    {
        let mut matching = Vec::new();
        for stored in self.objects.list(&self.kind).await? {
            let versioned = decode(stored)?;
            if predicate(&versioned.resource) {
                matching.push(versioned);
            }
        }
        Ok(matching)
    }

    pub async fn update(&self, resource: &T, expected: ResourceVersion) -> Result<Versioned<T>> {
        let key = self.key(resource.name());
        let stored = self
            .objects
            .update(&key, expected, encode(resource)?)
            .await
            .map_err(|e| redact::<T>(e, &key.name))?;
        decode(stored)
    }

    pub async fn delete(
        &self,
        name: &str,
        expected: Option<ResourceVersion>,
    ) -> Result<Versioned<T>> {
        let stored = self
            .objects
            .delete(&self.key(name), expected)
            .await
            .map_err(|e| redact::<T>(e, name))?;
        decode(stored)
    }

    pub async fn purge_expired(&self) -> Result<usize> {
        self.objects.purge_expired(&self.kind).await
    }
}

/// Placeholder for secret names in error messages
const REDACTED: &str = "<redacted>";

fn redact<T: StoredResource>(err: RegistryError, name: &str) -> RegistryError {
    if !T::SECRET_NAME || name.is_empty() {
        return err;
    }
    err.map_message(|message| message.replace(name, REDACTED))
}

fn label<T: StoredResource>(name: &str) -> &str {
    if T::SECRET_NAME { REDACTED } else { name }
}

fn encode<T: StoredResource>(resource: &T) -> Result<serde_json::Value> {
    serde_json::to_value(resource).map_err(|e| {
        RegistryError::InvalidInput(format!(
            "{} {} is not serializable: {}",
            T::KIND,
            label::<T>(resource.name()),
            e
        ))
    })
}

fn decode<T: StoredResource>(stored: StoredObject) -> Result<Versioned<T>> {
    let resource = serde_json::from_value(stored.payload).map_err(|e| {
        RegistryError::InvalidInput(format!(
            "stored {}/{} is malformed: {}",
            stored.key.kind,
            label::<T>(&stored.key.name),
            e
        ))
    })?;
    Ok(Versioned {
        resource,
        resource_version: stored.resource_version,
        expires_at: stored.expires_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::inmemory::MemoryObjectStore;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Widget {
        name: String,
        colour: String,
    }

    impl StoredResource for Widget {
        const KIND: &'static str = "widgets";

        fn name(&self) -> &str {
            &self.name
        }
    }

    fn widget(name: &str, colour: &str) -> Widget {
        Widget {
            name: name.to_string(),
            colour: colour.to_string(),
        }
    }

    #[tokio::test]
    async fn test_kind_is_prefixed() {
        let store: TypedStore<Widget> =
            TypedStore::new(Arc::new(MemoryObjectStore::new()), "/registry/");
        assert_eq!(store.kind(), "/registry/widgets");
        assert_eq!(store.key("w1").to_string(), "/registry/widgets/w1");
    }

    #[tokio::test]
    async fn test_create_get_update_preserve_entity() {
        let store: TypedStore<Widget> =
            TypedStore::new(Arc::new(MemoryObjectStore::new()), "/registry");

        let created = store.create(&widget("w1", "red"), None).await.unwrap();
        assert_eq!(created.resource, widget("w1", "red"));

        let fetched = store.get("w1").await.unwrap();
        assert_eq!(fetched, created);

        let updated = store
            .update(&widget("w1", "blue"), fetched.resource_version)
            .await
            .unwrap();
        assert_eq!(updated.resource.colour, "blue");
        assert_ne!(updated.resource_version, fetched.resource_version);
    }

    #[tokio::test]
    async fn test_list_applies_predicate() {
        let store: TypedStore<Widget> =
            TypedStore::new(Arc::new(MemoryObjectStore::new()), "/registry");
        store.create(&widget("a", "red"), None).await.unwrap();
        store.create(&widget("b", "blue"), None).await.unwrap();
        store.create(&widget("c", "red"), None).await.unwrap();

        let red = store.list(|w| w.colour == "red").await.unwrap();
        let names: Vec<_> = red.iter().map(|v| v.resource.name.as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_reported() {
        let objects = Arc::new(MemoryObjectStore::new());
        let store: TypedStore<Widget> = TypedStore::new(objects.clone(), "/registry");
        objects
            .create(&store.key("bad"), serde_json::json!({"name": 1}), None)
            .await
            .unwrap();

        let err = store.get("bad").await.unwrap_err();
        assert!(matches!(err, RegistryError::InvalidInput(_)));
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Credential {
        name: String,
    }

    impl StoredResource for Credential {
        const KIND: &'static str = "credentials";
        const SECRET_NAME: bool = true;

        fn name(&self) -> &str {
            &self.name
        }
    }

    #[tokio::test]
    async fn test_secret_names_stay_out_of_errors() {
        let objects = Arc::new(MemoryObjectStore::new());
        let store: TypedStore<Credential> = TypedStore::new(objects.clone(), "/registry");
        let secret = "hunter2-bearer-value";

        let missing = store.get(secret).await.unwrap_err();
        assert!(matches!(missing, RegistryError::NotFound(_)));
        assert!(!missing.to_string().contains(secret));
        assert!(missing.to_string().contains("/registry/credentials/<redacted>"));

        let credential = Credential {
            name: secret.to_string(),
        };
        let created = store.create(&credential, None).await.unwrap();
        let duplicate = store.create(&credential, None).await.unwrap_err();
        assert!(matches!(duplicate, RegistryError::AlreadyExists(_)));
        assert!(!format!("{:?}", duplicate).contains(secret));

        store.delete(secret, None).await.unwrap();
        let stale = store
            .update(&credential, created.resource_version)
            .await
            .unwrap_err();
        assert!(!stale.to_string().contains(secret));

        objects
            .create(&store.key("other-secret"), serde_json::json!({"name": 1}), None)
            .await
            .unwrap();
        let malformed = store.get("other-secret").await.unwrap_err();
        assert!(matches!(malformed, RegistryError::InvalidInput(_)));
        assert!(!malformed.to_string().contains("other-secret"));

        let widgets: TypedStore<Widget> = TypedStore::new(objects, "/registry");
        assert!(widgets.get("w9").await.unwrap_err().to_string().contains("w9"));
    }
}

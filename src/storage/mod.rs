//! Trait-based object storage with in-memory and PostgreSQL backends.

pub mod clock;
pub mod deadline;
pub mod inmemory;
pub mod traits;
pub mod typed;

// Feature-gated storage implementations
#[cfg(feature = "postgres")]
pub mod postgres;

// Re-export commonly used types and traits
pub use clock::{Clock, ManualClock, SystemClock};
pub use deadline::Deadline;
pub use inmemory::MemoryObjectStore;
pub use traits::*;
pub use typed::{StoredResource, TypedStore, Versioned};

#[cfg(feature = "postgres")]
pub use postgres::PostgresObjectStore;

use crate::errors::RegistryError;
use std::sync::Arc;

/// Storage backend configuration and factory
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    #[cfg(feature = "postgres")]
    Postgres(String), // Connection string
}

/// Create an object store for the configured backend
pub async fn create_object_store(
    backend: StorageBackend,
    clock: Arc<dyn Clock>,
) -> std::result::Result<Arc<dyn ObjectStore>, RegistryError> {
    match backend {
        StorageBackend::Memory => Ok(Arc::new(MemoryObjectStore::with_clock(clock))),
        #[cfg(feature = "postgres")]
        StorageBackend::Postgres(database_url) => {
            let pool = sqlx::postgres::PgPool::connect(&database_url)
                .await
                .map_err(|e| {
                    tracing::error!(error = ?e, "PostgreSQL connection failed");
                    RegistryError::Unavailable("PostgreSQL connection failed".to_string())
                })?;

            let storage = postgres::PostgresObjectStore::new(pool, clock);

            // Run migrations
            storage.migrate().await?;

            Ok(Arc::new(storage))
        }
    }
}

/// Parse storage backend from configuration string
pub fn parse_storage_backend(
    backend_name: &str,
    database_url: Option<&str>,
) -> std::result::Result<StorageBackend, RegistryError> {
    match backend_name {
        "memory" => Ok(StorageBackend::Memory),
        #[cfg(feature = "postgres")]
        "postgres" => {
            let url = database_url.ok_or_else(|| {
                RegistryError::InvalidInput(
                    "DATABASE_URL required for postgres backend".to_string(),
                )
            })?;
            Ok(StorageBackend::Postgres(url.to_string()))
        }
        _ => {
            let _ = database_url;
            Err(RegistryError::InvalidInput(format!(
                "Unknown storage backend: {}",
                backend_name
            )))
        }
    }
}

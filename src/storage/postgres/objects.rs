//! PostgreSQL implementation for object storage

use crate::errors::RegistryError;
use crate::storage::clock::Clock;
use crate::storage::traits::*;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::Row;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::types::Json;
use std::sync::Arc;

/// PostgreSQL implementation of [`ObjectStore`]
///
/// Items live in a single `registry_objects` table keyed by `(kind, name)`.
/// Resource versions come from the `registry_object_revisions` sequence.
pub struct PostgresObjectStore {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl PostgresObjectStore {
    /// Create a new PostgreSQL object store
    pub fn new(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    /// Run database migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations/postgres")
            .run(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!(error = ?e, "registry migration failed");
                RegistryError::Unavailable("Migration failed".to_string())
            })?;
        Ok(())
    }

    /// Convert PostgreSQL row to StoredObject
    fn row_to_object(key: &ObjectKey, row: &PgRow) -> Result<StoredObject> {
        let payload: Json<serde_json::Value> = row
            .try_get("payload")
            .map_err(|e| query_failed("payload", e))?;
        let resource_version: i64 = row
            .try_get("resource_version")
            .map_err(|e| query_failed("resource_version", e))?;
        let expires_at: Option<DateTime<Utc>> = row
            .try_get("expires_at")
            .map_err(|e| query_failed("expires_at", e))?;

        Ok(StoredObject {
            key: key.clone(),
            payload: payload.0,
            resource_version: ResourceVersion::new(resource_version as u64),
            expires_at,
        })
    }

    /// Distinguish a failed precondition from a missing item
    async fn conflict_or_not_found(&self, key: &ObjectKey) -> RegistryError {
        match self.get(key).await {
            Ok(_) => conflict(key),
            Err(err) => err,
        }
    }
}

fn query_failed(column: &str, err: sqlx::Error) -> RegistryError {
    tracing::warn!(column, error = ?err, "failed to decode registry row");
    RegistryError::Unavailable(format!("Failed to read {}", column))
}

/// Backend failures are logged in full but surfaced without connection details
fn unavailable(operation: &str, err: sqlx::Error) -> RegistryError {
    tracing::warn!(operation, error = ?err, "registry query failed");
    RegistryError::Unavailable(format!("{} failed", operation))
}

#[async_trait]
impl ObjectStore for PostgresObjectStore {
    async fn create(
        &self,
        key: &ObjectKey,
        payload: serde_json::Value,
        ttl: Option<Duration>,
    ) -> Result<StoredObject> {
        let now = self.clock.now();
        let expires_at = expiry_for(now, ttl);

        // An expired row does not hold on to its name
        let row = sqlx::query(
            r#"
            INSERT INTO registry_objects (kind, name, payload, resource_version, expires_at)
            VALUES ($1, $2, $3, nextval('registry_object_revisions'), $4)
            ON CONFLICT (kind, name) DO UPDATE
            SET payload = EXCLUDED.payload,
                resource_version = EXCLUDED.resource_version,
                expires_at = EXCLUDED.expires_at
            WHERE registry_objects.expires_at IS NOT NULL
              AND registry_objects.expires_at <= $5
            RETURNING payload, resource_version, expires_at
            "#,
        )
        .bind(&key.kind)
        .bind(&key.name)
        .bind(Json(&payload))
        .bind(expires_at)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| unavailable("create", e))?;

        match row {
            Some(row) => Self::row_to_object(key, &row),
            None => Err(already_exists(key)),
        }
    }

    async fn get(&self, key: &ObjectKey) -> Result<StoredObject> {
        let row = sqlx::query(
            r#"
            SELECT payload, resource_version, expires_at
            FROM registry_objects
            WHERE kind = $1 AND name = $2 AND (expires_at IS NULL OR expires_at > $3)
            "#,
        )
        .bind(&key.kind)
        .bind(&key.name)
        .bind(self.clock.now())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| unavailable("get", e))?;

        match row {
            Some(row) => Self::row_to_object(key, &row),
            None => Err(not_found(key)),
        }
    }

    async fn list(&self, kind: &str) -> Result<Vec<StoredObject>> {
        let rows = sqlx::query(
            r#"
            SELECT name, payload, resource_version, expires_at
            FROM registry_objects
            WHERE kind = $1 AND (expires_at IS NULL OR expires_at > $2)
            ORDER BY name
            "#,
        )
        .bind(kind)
        .bind(self.clock.now())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| unavailable("list", e))?;

        rows.iter()
            .map(|row| {
                let name: String = row.try_get("name").map_err(|e| query_failed("name", e))?;
                Self::row_to_object(&ObjectKey::new(kind, name), row)
            })
            .collect()
    }

    async fn update(
        &self,
        key: &ObjectKey,
        expected_version: ResourceVersion,
        payload: serde_json::Value,
    ) -> Result<StoredObject> {
        let row = sqlx::query(
            r#"
            UPDATE registry_objects
            SET payload = $3, resource_version = nextval('registry_object_revisions')
            WHERE kind = $1 AND name = $2 AND resource_version = $4
              AND (expires_at IS NULL OR expires_at > $5)
            RETURNING payload, resource_version, expires_at
            "#,
        )
        .bind(&key.kind)
        .bind(&key.name)
        .bind(Json(&payload))
        .bind(expected_version.as_u64() as i64)
        .bind(self.clock.now())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| unavailable("update", e))?;

        match row {
            Some(row) => Self::row_to_object(key, &row),
            None => Err(self.conflict_or_not_found(key).await),
        }
    }

    async fn delete(
        &self,
        key: &ObjectKey,
        expected_version: Option<ResourceVersion>,
    ) -> Result<StoredObject> {
        let row = sqlx::query(
            r#"
            DELETE FROM registry_objects
            WHERE kind = $1 AND name = $2
              AND ($3::BIGINT IS NULL OR resource_version = $3)
              AND (expires_at IS NULL OR expires_at > $4)
            RETURNING payload, resource_version, expires_at
            "#,
        )
        .bind(&key.kind)
        .bind(&key.name)
        .bind(expected_version.map(|version| version.as_u64() as i64))
        .bind(self.clock.now())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| unavailable("delete", e))?;

        match (row, expected_version) {
            (Some(row), _) => Self::row_to_object(key, &row),
            (None, Some(_)) => Err(self.conflict_or_not_found(key).await),
            (None, None) => Err(not_found(key)),
        }
    }

    async fn purge_expired(&self, kind: &str) -> Result<usize> {
        let result = sqlx::query(
            r#"
            DELETE FROM registry_objects
            WHERE kind = $1 AND expires_at IS NOT NULL AND expires_at <= $2
            "#,
        )
        .bind(kind)
        .bind(self.clock.now())
        .execute(&self.pool)
        .await
        .map_err(|e| unavailable("purge", e))?;

        Ok(result.rows_affected() as usize)
    }
}

//! Registry of explicitly registered OAuth clients.

use crate::errors::RegistryError;
use crate::oauth::types::{OAuthClient, ResolvedClient};
use crate::storage::traits::{ObjectStore, ResourceVersion, Result};
use crate::storage::{Deadline, TypedStore, Versioned};
use std::sync::Arc;
use url::Url;

pub struct ClientRegistry {
    store: TypedStore<OAuthClient>,
}

impl ClientRegistry {
    pub fn new(objects: Arc<dyn ObjectStore>, prefix: &str) -> Self {
        Self {
            store: TypedStore::new(objects, prefix),
        }
    }

    /// Register a new client
    pub async fn create(
        &self,
        client: &OAuthClient,
        deadline: Deadline,
    ) -> Result<Versioned<OAuthClient>> {
        deadline
            .run("create client", async {
                validate_client(client)?;
                self.store.create(client, None).await
            })
            .await
    }

    pub async fn get(&self, name: &str, deadline: Deadline) -> Result<Versioned<OAuthClient>> {
        deadline.run("get client", self.store.get(name)).await
    }

    pub async fn list(&self, deadline: Deadline) -> Result<Vec<Versioned<OAuthClient>>> {
        deadline.run("list clients", self.store.list(|_| true)).await
    }

    /// Replace a client, failing with `Conflict` if it changed since `expected_version` was read
    pub async fn update(
        &self,
        client: &OAuthClient,
        expected_version: ResourceVersion,
        deadline: Deadline,
    ) -> Result<Versioned<OAuthClient>> {
        deadline
            .run("update client", async {
                validate_client(client)?;
                self.store.update(client, expected_version).await
            })
            .await
    }

    pub async fn delete(&self, name: &str, deadline: Deadline) -> Result<()> {
        deadline
            .run("delete client", async {
                self.store.delete(name, None).await?;
                tracing::info!(client = name, "deleted oauth client");
                Ok(())
            })
            .await
    }

    /// Check a presented secret in constant time.
    ///
    /// Unknown clients fail with `NotFound` rather than `false` so callers can
    /// tell a bad secret from a bad client name.
    pub async fn validate_secret(
        &self,
        name: &str,
        provided_secret: &str,
        deadline: Deadline,
    ) -> Result<bool> {
        let client = self.get(name, deadline).await?;
        Ok(ResolvedClient::Explicit(client.resource).secret_matches(provided_secret))
    }
}

fn validate_client(client: &OAuthClient) -> Result<()> {
    if client.name.trim().is_empty() {
        return Err(RegistryError::InvalidInput(
            "client name is required".to_string(),
        ));
    }
    if !client.public && client.secret.is_empty() {
        return Err(RegistryError::InvalidInput(format!(
            "client {} must have a secret unless it is public",
            client.name
        )));
    }
    for redirect_uri in &client.redirect_uris {
        Url::parse(redirect_uri).map_err(|e| {
            RegistryError::InvalidInput(format!(
                "client {} has invalid redirect URI {}: {}",
                client.name, redirect_uri, e
            ))
        })?;
    }
    if client
        .access_token_max_age_seconds
        .is_some_and(|max_age| max_age < 0)
    {
        return Err(RegistryError::InvalidInput(format!(
            "client {} has a negative access token max age",
            client.name
        )));
    }
    Ok(())
}

//! Registry of scopes users have granted to clients.

use crate::errors::RegistryError;
use crate::oauth::clients::CombinedClientResolver;
use crate::oauth::types::{ClientAuthorization, merge_scopes};
use crate::registry::require_name;
use crate::storage::traits::{ObjectStore, Result};
use crate::storage::{Clock, Deadline, TypedStore};
use std::sync::Arc;

/// Attempts at the read-merge-write cycle before giving up with `Conflict`
pub const DEFAULT_MAX_GRANT_ATTEMPTS: usize = 5;

pub struct ClientAuthorizationRegistry {
    store: TypedStore<ClientAuthorization>,
    resolver: Arc<CombinedClientResolver>,
    clock: Arc<dyn Clock>,
    max_attempts: usize,
}

impl ClientAuthorizationRegistry {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        prefix: &str,
        resolver: Arc<CombinedClientResolver>,
        clock: Arc<dyn Clock>,
        max_attempts: usize,
    ) -> Self {
        Self {
            store: TypedStore::new(objects, prefix),
            resolver,
            clock,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Add `scopes` to the user's authorization of a client, creating it if needed.
    ///
    /// Concurrent grants for the same pair are merged; none of them loses scopes.
    pub async fn grant(
        &self,
        user_name: &str,
        client_name: &str,
        scopes: &[String],
        deadline: Deadline,
    ) -> Result<ClientAuthorization> {
        require_name("user", user_name)?;
        require_name("client", client_name)?;
        match self.resolver.resolve(client_name, deadline).await {
            Ok(_) => {}
            Err(RegistryError::NotFound(_)) => {
                return Err(RegistryError::InvalidInput(format!(
                    "client {} does not exist",
                    client_name
                )));
            }
            Err(err) => return Err(err),
        }

        let name = ClientAuthorization::name_for(user_name, client_name);
        deadline
            .run("grant client authorization", async {
                for attempt in 1..=self.max_attempts {
                    let now = self.clock.now();
                    let written = match self.store.get(&name).await {
                        Ok(existing) => {
                            if !existing.resource.is_for(user_name, client_name) {
                                return Err(foreign_record(&name));
                            }
                            let merged = merge_scopes(&existing.resource.scopes, scopes);
                            if merged == existing.resource.scopes {
                                return Ok(existing.resource);
                            }
                            let updated = ClientAuthorization {
                                scopes: merged,
                                updated_at: now,
                                ..existing.resource
                            };
                            self.store.update(&updated, existing.resource_version).await
                        }
                        Err(RegistryError::NotFound(_)) => {
                            let created = ClientAuthorization {
                                name: name.clone(),
                                user_name: user_name.to_string(),
                                client_name: client_name.to_string(),
                                user_uid: None,
                                scopes: merge_scopes(&[], scopes),
                                created_at: now,
                                updated_at: now,
                            };
                            self.store.create(&created, None).await
                        }
                        Err(err) => return Err(err),
                    };

                    match written {
                        Ok(written) => return Ok(written.resource),
                        Err(RegistryError::Conflict(_)) | Err(RegistryError::AlreadyExists(_)) => {
                            tracing::debug!(
                                user = user_name,
                                client = client_name,
                                attempt,
                                "client authorization changed during grant, retrying"
                            );
                        }
                        Err(err) => return Err(err),
                    }
                }

                tracing::warn!(
                    user = user_name,
                    client = client_name,
                    attempts = self.max_attempts,
                    "giving up on contended client authorization"
                );
                Err(RegistryError::Conflict(format!(
                    "authorization of client {} by user {} is contended",
                    client_name, user_name
                )))
            })
            .await
    }

    pub async fn get(
        &self,
        user_name: &str,
        client_name: &str,
        deadline: Deadline,
    ) -> Result<ClientAuthorization> {
        let name = ClientAuthorization::name_for(user_name, client_name);
        deadline
            .run("get client authorization", async {
                let authorization = self.store.get(&name).await?.resource;
                if !authorization.is_for(user_name, client_name) {
                    return Err(foreign_record(&name));
                }
                Ok(authorization)
            })
            .await
    }

    /// Forget a user's authorization of a client. Absent authorizations are not an error.
    pub async fn delete(&self, user_name: &str, client_name: &str, deadline: Deadline) -> Result<()> {
        let name = ClientAuthorization::name_for(user_name, client_name);
        deadline
            .run("delete client authorization", async {
                match self.store.delete(&name, None).await {
                    Ok(_) | Err(RegistryError::NotFound(_)) => Ok(()),
                    Err(err) => Err(err),
                }
            })
            .await
    }

    pub async fn list_by_user(
        &self,
        user_name: &str,
        deadline: Deadline,
    ) -> Result<Vec<ClientAuthorization>> {
        deadline
            .run("list client authorizations", async {
                let authorizations = self
                    .store
                    .list(|authorization| authorization.user_name == user_name)
                    .await?;
                Ok(authorizations
                    .into_iter()
                    .map(|authorization| authorization.resource)
                    .collect())
            })
            .await
    }

    /// Whether the user already granted the client every requested scope
    pub async fn covers(
        &self,
        user_name: &str,
        client_name: &str,
        scopes: &[String],
        deadline: Deadline,
    ) -> Result<bool> {
        match self.get(user_name, client_name, deadline).await {
            Ok(authorization) => Ok(authorization.covers(scopes)),
            Err(RegistryError::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }
}

fn foreign_record(name: &str) -> RegistryError {
    tracing::warn!(name, "client authorization is stored under another user or client");
    RegistryError::InvalidInput(format!(
        "client authorization {} belongs to a different user or client",
        name
    ))
}

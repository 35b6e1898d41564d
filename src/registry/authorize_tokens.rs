//! Registry of single-use authorization codes.

use crate::errors::RegistryError;
use crate::oauth::clients::CombinedClientResolver;
use crate::oauth::types::AuthorizeToken;
use crate::registry::{require_name, resolve_token_client};
use crate::storage::traits::{ObjectStore, Result};
use crate::storage::{Deadline, TypedStore, Versioned};
use chrono::Duration;
use std::sync::Arc;

/// Re-reads allowed when the code changes between read and delete
const EXCHANGE_ATTEMPTS: usize = 3;

pub struct AuthorizeTokenRegistry {
    store: TypedStore<AuthorizeToken>,
    resolver: Arc<CombinedClientResolver>,
}

impl AuthorizeTokenRegistry {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        prefix: &str,
        resolver: Arc<CombinedClientResolver>,
    ) -> Self {
        Self {
            store: TypedStore::new(objects, prefix),
            resolver,
        }
    }

    /// Store a new code with its TTL.
    ///
    /// Fails with `AlreadyExists` on a code collision; the caller regenerates.
    pub async fn issue(&self, token: &AuthorizeToken, deadline: Deadline) -> Result<AuthorizeToken> {
        deadline
            .run("issue authorize token", async {
                require_name("authorize token", &token.name)?;
                if token.expires_in <= 0 {
                    return Err(RegistryError::InvalidInput(
                        "authorize tokens must expire".to_string(),
                    ));
                }

                let client = resolve_token_client(
                    &self.resolver,
                    &token.client_name,
                    &token.user_name,
                    deadline,
                )
                .await?;
                if !client.allows_redirect_uri(&token.redirect_uri) {
                    return Err(RegistryError::InvalidInput(format!(
                        "redirect URI is not registered for client {}",
                        token.client_name
                    )));
                }

                let stored = self
                    .store
                    .create(token, Some(Duration::seconds(token.expires_in)))
                    .await?;
                Ok(stored.resource)
            })
            .await
    }

    /// Consume a code. At most one caller ever receives a given code.
    ///
    /// Unknown, expired and already exchanged codes all fail with `NotFound`.
    pub async fn exchange(&self, code: &str, deadline: Deadline) -> Result<AuthorizeToken> {
        Ok(self.consume(code, deadline).await?.resource)
    }

    /// Consume a code, keeping its stored expiry so it can be put back
    pub(crate) async fn consume(
        &self,
        code: &str,
        deadline: Deadline,
    ) -> Result<Versioned<AuthorizeToken>> {
        deadline
            .run("exchange authorize token", async {
                for _ in 0..EXCHANGE_ATTEMPTS {
                    let current = self.store.get(code).await?;
                    match self.store.delete(code, Some(current.resource_version)).await {
                        Ok(deleted) => return Ok(deleted),
                        Err(RegistryError::Conflict(_)) => continue,
                        Err(err) => return Err(err),
                    }
                }
                Err(RegistryError::Conflict(format!(
                    "authorize token could not be exchanged after {} attempts",
                    EXCHANGE_ATTEMPTS
                )))
            })
            .await
    }

    /// Put a consumed code back for its remaining lifetime.
    ///
    /// Skips the client checks of `issue`: the code was already accepted once.
    pub(crate) async fn restore(
        &self,
        token: &AuthorizeToken,
        remaining: Duration,
        deadline: Deadline,
    ) -> Result<()> {
        deadline
            .run("restore authorize token", async {
                self.store.create(token, Some(remaining)).await?;
                Ok(())
            })
            .await
    }

    /// Look at a code without consuming it
    pub async fn get(&self, code: &str, deadline: Deadline) -> Result<AuthorizeToken> {
        deadline
            .run("get authorize token", async {
                Ok(self.store.get(code).await?.resource)
            })
            .await
    }

    pub async fn purge_expired(&self, deadline: Deadline) -> Result<usize> {
        deadline
            .run("purge authorize tokens", self.store.purge_expired())
            .await
    }
}

//! Registry of bearer access tokens.

use crate::errors::RegistryError;
use crate::oauth::clients::CombinedClientResolver;
use crate::oauth::types::AccessToken;
use crate::registry::{require_name, resolve_token_client};
use crate::storage::traits::{ObjectStore, Result};
use crate::storage::{Deadline, TypedStore};
use chrono::Duration;
use std::sync::Arc;

/// Issuance rules that come from process configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccessTokenPolicy {
    /// Accept `expires_in == 0` as a token that never expires
    pub allow_non_expiring: bool,
}

pub struct AccessTokenRegistry {
    store: TypedStore<AccessToken>,
    resolver: Arc<CombinedClientResolver>,
    policy: AccessTokenPolicy,
}

impl AccessTokenRegistry {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        prefix: &str,
        resolver: Arc<CombinedClientResolver>,
        policy: AccessTokenPolicy,
    ) -> Self {
        Self {
            store: TypedStore::new(objects, prefix),
            resolver,
            policy,
        }
    }

    /// Store a new access token.
    ///
    /// The stored lifetime is capped by the client's access token max age, so
    /// the returned token may carry a shorter `expires_in` than requested.
    pub async fn issue(&self, token: &AccessToken, deadline: Deadline) -> Result<AccessToken> {
        deadline
            .run("issue access token", async {
                require_name("access token", &token.name)?;
                if token.expires_in < 0 {
                    return Err(RegistryError::InvalidInput(
                        "access token lifetime cannot be negative".to_string(),
                    ));
                }
                if token.expires_in == 0 && !self.policy.allow_non_expiring {
                    return Err(RegistryError::InvalidInput(
                        "non-expiring access tokens are not allowed".to_string(),
                    ));
                }

                let client = resolve_token_client(
                    &self.resolver,
                    &token.client_name,
                    &token.user_name,
                    deadline,
                )
                .await?;

                let mut token = token.clone();
                if let Some(max_age) = client.access_token_max_age_seconds().filter(|age| *age > 0) {
                    if token.expires_in == 0 || token.expires_in > max_age {
                        tracing::debug!(
                            client = %token.client_name,
                            requested = token.expires_in,
                            max_age,
                            "capping access token lifetime"
                        );
                        token.expires_in = max_age;
                    }
                }

                let ttl = (token.expires_in > 0).then(|| Duration::seconds(token.expires_in));
                Ok(self.store.create(&token, ttl).await?.resource)
            })
            .await
    }

    pub async fn get(&self, name: &str, deadline: Deadline) -> Result<AccessToken> {
        deadline
            .run("get access token", async {
                Ok(self.store.get(name).await?.resource)
            })
            .await
    }

    /// Remove a token. Revoking an unknown or expired token succeeds.
    pub async fn revoke(&self, name: &str, deadline: Deadline) -> Result<()> {
        deadline
            .run("revoke access token", async {
                match self.store.delete(name, None).await {
                    Ok(revoked) => {
                        tracing::info!(
                            client = %revoked.resource.client_name,
                            user = %revoked.resource.user_name,
                            "revoked access token"
                        );
                        Ok(())
                    }
                    Err(RegistryError::NotFound(_)) => Ok(()),
                    Err(err) => Err(err),
                }
            })
            .await
    }

    pub async fn list_by_user(&self, user_name: &str, deadline: Deadline) -> Result<Vec<AccessToken>> {
        deadline
            .run("list access tokens by user", async {
                let tokens = self.store.list(|token| token.user_name == user_name).await?;
                Ok(tokens.into_iter().map(|token| token.resource).collect())
            })
            .await
    }

    pub async fn list_by_client(
        &self,
        client_name: &str,
        deadline: Deadline,
    ) -> Result<Vec<AccessToken>> {
        deadline
            .run("list access tokens by client", async {
                let tokens = self
                    .store
                    .list(|token| token.client_name == client_name)
                    .await?;
                Ok(tokens.into_iter().map(|token| token.resource).collect())
            })
            .await
    }

    /// Revoke every live token of a client, returning how many were removed
    pub async fn revoke_all_for_client(&self, client_name: &str, deadline: Deadline) -> Result<usize> {
        deadline
            .run("revoke access tokens by client", async {
                let tokens = self
                    .store
                    .list(|token| token.client_name == client_name)
                    .await?;

                let mut revoked = 0;
                for token in tokens {
                    match self.store.delete(&token.resource.name, None).await {
                        Ok(_) => revoked += 1,
                        Err(RegistryError::NotFound(_)) => {}
                        Err(err) => return Err(err),
                    }
                }
                tracing::info!(client = client_name, revoked, "revoked client access tokens");
                Ok(revoked)
            })
            .await
    }

    pub async fn purge_expired(&self, deadline: Deadline) -> Result<usize> {
        deadline
            .run("purge access tokens", self.store.purge_expired())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::clients::MemoryServiceAccountGetter;
    use crate::oauth::types::{GrantMethod, OAuthClient};
    use crate::registry::ClientRegistry;
    use crate::storage::{ManualClock, MemoryObjectStore};
    use chrono::Utc;

    async fn registry(policy: AccessTokenPolicy) -> (AccessTokenRegistry, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let objects: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::with_clock(clock.clone()));
        let clients = Arc::new(ClientRegistry::new(objects.clone(), "/oauth"));
        for (name, max_age) in [("c1", None), ("short", Some(60))] {
            clients
                .create(
                    &OAuthClient {
                        name: name.to_string(),
                        secret: "secret".to_string(),
                        additional_secrets: vec![],
                        redirect_uris: vec![],
                        grant_method: None,
                        public: false,
                        access_token_max_age_seconds: max_age,
                    },
                    Deadline::none(),
                )
                .await
                .unwrap();
        }
        let resolver = Arc::new(CombinedClientResolver::new(
            clients,
            Arc::new(MemoryServiceAccountGetter::new()),
            GrantMethod::Prompt,
        ));
        (AccessTokenRegistry::new(objects, "/oauth", resolver, policy), clock)
    }

    fn token(name: &str, client: &str, user: &str, expires_in: i64) -> AccessToken {
        AccessToken {
            name: name.to_string(),
            client_name: client.to_string(),
            user_name: user.to_string(),
            user_uid: None,
            scopes: vec!["user:info".to_string()],
            redirect_uri: String::new(),
            authorize_token: None,
            refresh_token: None,
            created_at: Utc::now(),
            expires_in,
        }
    }

    #[tokio::test]
    async fn test_token_expires_with_clock() {
        let (registry, clock) = registry(AccessTokenPolicy::default()).await;
        registry.issue(&token("t1", "c1", "u1", 3600), Deadline::none()).await.unwrap();

        clock.advance(Duration::seconds(3599));
        assert!(registry.get("t1", Deadline::none()).await.is_ok());

        clock.advance(Duration::seconds(1));
        assert!(matches!(
            registry.get("t1", Deadline::none()).await,
            Err(RegistryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_non_expiring_tokens_follow_policy() {
        let (strict, _) = registry(AccessTokenPolicy::default()).await;
        assert!(matches!(
            strict.issue(&token("t1", "c1", "u1", 0), Deadline::none()).await,
            Err(RegistryError::InvalidInput(_))
        ));

        let (relaxed, clock) = registry(AccessTokenPolicy { allow_non_expiring: true }).await;
        relaxed.issue(&token("t1", "c1", "u1", 0), Deadline::none()).await.unwrap();
        clock.advance(Duration::days(3650));
        assert!(relaxed.get("t1", Deadline::none()).await.is_ok());
    }

    #[tokio::test]
    async fn test_client_max_age_caps_lifetime() {
        let (registry, clock) = registry(AccessTokenPolicy::default()).await;
        let issued = registry
            .issue(&token("t1", "short", "u1", 3600), Deadline::none())
            .await
            .unwrap();
        assert_eq!(issued.expires_in, 60);

        clock.advance(Duration::seconds(61));
        assert!(matches!(
            registry.get("t1", Deadline::none()).await,
            Err(RegistryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_revoke_is_idempotent() {
        let (registry, _) = registry(AccessTokenPolicy::default()).await;
        registry.issue(&token("t1", "c1", "u1", 3600), Deadline::none()).await.unwrap();

        registry.revoke("t1", Deadline::none()).await.unwrap();
        registry.revoke("t1", Deadline::none()).await.unwrap();
        registry.revoke("never-issued", Deadline::none()).await.unwrap();
        assert!(matches!(
            registry.get("t1", Deadline::none()).await,
            Err(RegistryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_listing_and_bulk_revoke() {
        let (registry, _) = registry(AccessTokenPolicy::default()).await;
        registry.issue(&token("t1", "c1", "u1", 3600), Deadline::none()).await.unwrap();
        registry.issue(&token("t2", "c1", "u2", 3600), Deadline::none()).await.unwrap();
        registry.issue(&token("t3", "short", "u1", 30), Deadline::none()).await.unwrap();

        let names = |tokens: Vec<AccessToken>| tokens.into_iter().map(|t| t.name).collect::<Vec<_>>();
        assert_eq!(names(registry.list_by_user("u1", Deadline::none()).await.unwrap()), vec!["t1", "t3"]);
        assert_eq!(names(registry.list_by_client("c1", Deadline::none()).await.unwrap()), vec!["t1", "t2"]);

        assert_eq!(registry.revoke_all_for_client("c1", Deadline::none()).await.unwrap(), 2);
        assert!(registry.list_by_client("c1", Deadline::none()).await.unwrap().is_empty());
        assert_eq!(registry.list_by_user("u1", Deadline::none()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_client_is_invalid_input() {
        let (registry, _) = registry(AccessTokenPolicy::default()).await;
        assert!(matches!(
            registry.issue(&token("t1", "ghost", "u1", 3600), Deadline::none()).await,
            Err(RegistryError::InvalidInput(_))
        ));
    }
}

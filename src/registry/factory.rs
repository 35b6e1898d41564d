//! Lazy, exactly-once construction of the registry set.

use crate::config::Config;
use crate::errors::RegistryError;
use crate::oauth::clients::{
    CombinedClientResolver, HttpServiceAccountGetter, MemoryServiceAccountGetter,
    ServiceAccountGetter,
};
use crate::oauth::grant::GrantEvaluator;
use crate::oauth::issuer::TokenIssuer;
use crate::oauth::types::GrantMethod;
use crate::registry::{
    AccessTokenPolicy, AccessTokenRegistry, AuthorizeTokenRegistry, ClientAuthorizationRegistry,
    ClientRegistry, DEFAULT_MAX_GRANT_ATTEMPTS,
};
use crate::storage::traits::{ObjectStore, Result};
use crate::storage::{Clock, StorageBackend, SystemClock, create_object_store, parse_storage_backend};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Tunables shared by every registry in a set
#[derive(Debug, Clone)]
pub struct RegistrySettings {
    pub storage_prefix: String,
    pub default_grant_method: GrantMethod,
    pub authorize_token_lifetime: chrono::Duration,
    pub access_token_lifetime: chrono::Duration,
    pub access_token_policy: AccessTokenPolicy,
    pub max_grant_attempts: usize,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            storage_prefix: "/oauth".to_string(),
            default_grant_method: GrantMethod::Deny,
            authorize_token_lifetime: chrono::Duration::minutes(5),
            access_token_lifetime: chrono::Duration::days(1),
            access_token_policy: AccessTokenPolicy::default(),
            max_grant_attempts: DEFAULT_MAX_GRANT_ATTEMPTS,
        }
    }
}

impl From<&Config> for RegistrySettings {
    fn from(config: &Config) -> Self {
        Self {
            storage_prefix: config.storage_prefix.as_ref().to_string(),
            default_grant_method: *config.service_account_grant_method.as_ref(),
            authorize_token_lifetime: *config.authorize_token_expiration.as_ref(),
            access_token_lifetime: *config.access_token_expiration.as_ref(),
            access_token_policy: AccessTokenPolicy {
                allow_non_expiring: *config.allow_non_expiring_access_tokens.as_ref(),
            },
            max_grant_attempts: *config.client_authorization_max_retries.as_ref(),
        }
    }
}

/// Every registry over one backing store, plus the flows built on them
pub struct RegistrySet {
    pub clients: Arc<ClientRegistry>,
    pub authorize_tokens: Arc<AuthorizeTokenRegistry>,
    pub access_tokens: Arc<AccessTokenRegistry>,
    pub client_authorizations: Arc<ClientAuthorizationRegistry>,
    pub resolver: Arc<CombinedClientResolver>,
    pub grants: Arc<GrantEvaluator>,
    pub issuer: Arc<TokenIssuer>,
}

impl RegistrySet {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        service_accounts: Arc<dyn ServiceAccountGetter>,
        settings: &RegistrySettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let prefix = settings.storage_prefix.as_str();
        let clients = Arc::new(ClientRegistry::new(objects.clone(), prefix));
        let resolver = Arc::new(CombinedClientResolver::new(
            clients.clone(),
            service_accounts,
            settings.default_grant_method,
        ));
        let authorize_tokens = Arc::new(AuthorizeTokenRegistry::new(
            objects.clone(),
            prefix,
            resolver.clone(),
        ));
        let access_tokens = Arc::new(AccessTokenRegistry::new(
            objects.clone(),
            prefix,
            resolver.clone(),
            settings.access_token_policy,
        ));
        let client_authorizations = Arc::new(ClientAuthorizationRegistry::new(
            objects,
            prefix,
            resolver.clone(),
            clock.clone(),
            settings.max_grant_attempts,
        ));
        let grants = Arc::new(GrantEvaluator::new(
            resolver.clone(),
            client_authorizations.clone(),
        ));
        let issuer = Arc::new(TokenIssuer::new(
            authorize_tokens.clone(),
            access_tokens.clone(),
            resolver.clone(),
            clock,
            settings.authorize_token_lifetime,
            settings.access_token_lifetime,
        ));

        Self {
            clients,
            authorize_tokens,
            access_tokens,
            client_authorizations,
            resolver,
            grants,
            issuer,
        }
    }
}

/// Source of a registry set
#[async_trait]
pub trait RegistryBuilder: Send + Sync {
    async fn build(&self) -> Result<RegistrySet>;
}

/// Builds registries over a configured storage backend and identity client
pub struct BackendRegistryBuilder {
    backend: StorageBackend,
    service_accounts: Arc<dyn ServiceAccountGetter>,
    settings: RegistrySettings,
    clock: Arc<dyn Clock>,
}

impl BackendRegistryBuilder {
    pub fn new(
        backend: StorageBackend,
        service_accounts: Arc<dyn ServiceAccountGetter>,
        settings: RegistrySettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            backend,
            service_accounts,
            settings,
            clock,
        }
    }

    /// Wire the backend and identity client described by `config`.
    ///
    /// Without `IDENTITY_API_URL` no service account ever resolves, so only
    /// explicitly registered clients exist.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let backend =
            parse_storage_backend(&config.storage_backend, config.database_url.as_deref())?;

        let service_accounts: Arc<dyn ServiceAccountGetter> = match &config.identity_api_url {
            Some(identity_api_url) => {
                let http_client = reqwest::Client::builder()
                    .user_agent(config.user_agent.clone())
                    .timeout(*config.http_client_timeout.as_ref())
                    .build()?;
                Arc::new(HttpServiceAccountGetter::new(
                    http_client,
                    identity_api_url.clone(),
                    config.identity_namespace.clone(),
                    config.identity_api_token.clone(),
                ))
            }
            None => {
                tracing::info!("IDENTITY_API_URL not set, service account clients are disabled");
                Arc::new(MemoryServiceAccountGetter::new())
            }
        };

        Ok(Self::new(
            backend,
            service_accounts,
            RegistrySettings::from(config),
            Arc::new(SystemClock),
        ))
    }
}

#[async_trait]
impl RegistryBuilder for BackendRegistryBuilder {
    async fn build(&self) -> Result<RegistrySet> {
        let objects = create_object_store(self.backend.clone(), self.clock.clone()).await?;
        Ok(RegistrySet::new(
            objects,
            self.service_accounts.clone(),
            &self.settings,
            self.clock.clone(),
        ))
    }
}

/// Builds the registry set on first use and hands the same result to every caller.
///
/// A failed construction is cached as well; it is never retried within the process.
/// Construction runs on its own task, so a caller dropped mid-build does not
/// restart it for the next one.
pub struct StorageFactory {
    builder: Arc<dyn RegistryBuilder>,
    registries: Arc<OnceCell<Result<Arc<RegistrySet>>>>,
}

impl StorageFactory {
    pub fn new(builder: impl RegistryBuilder + 'static) -> Self {
        Self {
            builder: Arc::new(builder),
            registries: Arc::new(OnceCell::new()),
        }
    }

    pub async fn registries(&self) -> Result<Arc<RegistrySet>> {
        if let Some(registries) = self.registries.get() {
            return registries.clone();
        }

        let builder = self.builder.clone();
        let cell = self.registries.clone();
        let construction = tokio::spawn(async move {
            cell.get_or_init(|| async {
                match builder.build().await {
                    Ok(registries) => {
                        tracing::info!("registries constructed");
                        Ok(Arc::new(registries))
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "registry construction failed");
                        Err(RegistryError::ConstructionFailed(err.to_string()))
                    }
                }
            })
            .await
            .clone()
        });

        construction.await.unwrap_or_else(|e| {
            tracing::error!(error = %e, "registry construction task failed");
            Err(RegistryError::ConstructionFailed(e.to_string()))
        })
    }
}

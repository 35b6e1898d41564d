//! Read-only query contract against the identity subsystem that owns service accounts.

use crate::errors::IdentityError;
use async_trait::async_trait;
use base64::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use url::Url;

/// Service account as exposed by the identity subsystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAccount {
    pub name: String,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl ServiceAccount {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            annotations: BTreeMap::new(),
        }
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }
}

/// Lookups the resolver needs from the identity subsystem
#[async_trait]
pub trait ServiceAccountGetter: Send + Sync {
    /// Service account by name, `None` when it does not exist
    async fn get_service_account(&self, name: &str)
    -> Result<Option<ServiceAccount>, IdentityError>;

    /// Secret value behind a secret reference, `None` when it does not exist
    async fn get_secret(&self, reference: &str) -> Result<Option<String>, IdentityError>;
}

/// In-memory service account directory
#[derive(Default)]
pub struct MemoryServiceAccountGetter {
    accounts: RwLock<HashMap<String, ServiceAccount>>,
    secrets: RwLock<HashMap<String, String>>,
}

impl MemoryServiceAccountGetter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_service_account(&self, account: ServiceAccount) {
        self.accounts
            .write()
            .await
            .insert(account.name.clone(), account);
    }

    pub async fn remove_service_account(&self, name: &str) {
        self.accounts.write().await.remove(name);
    }

    pub async fn insert_secret(&self, reference: impl Into<String>, value: impl Into<String>) {
        self.secrets
            .write()
            .await
            .insert(reference.into(), value.into());
    }
}

#[async_trait]
impl ServiceAccountGetter for MemoryServiceAccountGetter {
    async fn get_service_account(
        &self,
        name: &str,
    ) -> Result<Option<ServiceAccount>, IdentityError> {
        Ok(self.accounts.read().await.get(name).cloned())
    }

    async fn get_secret(&self, reference: &str) -> Result<Option<String>, IdentityError> {
        Ok(self.secrets.read().await.get(reference).cloned())
    }
}

#[derive(Deserialize)]
struct ObjectMeta {
    name: String,
    #[serde(default)]
    annotations: BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct ServiceAccountResource {
    metadata: ObjectMeta,
}

#[derive(Deserialize)]
struct SecretResource {
    #[serde(default)]
    data: BTreeMap<String, String>,
}

/// Key inside a referenced secret that carries the client secret
pub const SECRET_TOKEN_KEY: &str = "token";

/// Identity client backed by a Kubernetes-style core API
pub struct HttpServiceAccountGetter {
    http_client: reqwest::Client,
    base_url: String,
    namespace: String,
    bearer_token: Option<String>,
}

impl HttpServiceAccountGetter {
    pub fn new(
        http_client: reqwest::Client,
        base_url: impl Into<String>,
        namespace: impl Into<String>,
        bearer_token: Option<String>,
    ) -> Self {
        Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            namespace: namespace.into(),
            bearer_token,
        }
    }

    fn resource_url(&self, collection: &str, name: &str) -> Result<Url, IdentityError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| IdentityError::RequestFailed(format!("identity API URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| {
                IdentityError::RequestFailed(format!(
                    "identity API URL {} cannot carry a path",
                    self.base_url
                ))
            })?
            .pop_if_empty()
            .extend(["api", "v1", "namespaces", self.namespace.as_str(), collection, name]);
        Ok(url)
    }

    async fn fetch<T: serde::de::DeserializeOwned>(
        &self,
        collection: &str,
        name: &str,
    ) -> Result<Option<T>, IdentityError> {
        // Such a name cannot exist upstream
        if !is_dns_subdomain(name) {
            tracing::debug!(collection, name, "skipping lookup of invalid object name");
            return Ok(None);
        }

        let mut request = self.http_client.get(self.resource_url(collection, name)?);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| IdentityError::RequestFailed(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(IdentityError::RequestFailed(format!(
                "{} lookup returned {}",
                collection,
                response.status()
            )));
        }

        response
            .json::<T>()
            .await
            .map(Some)
            .map_err(|e| IdentityError::InvalidResponse(e.to_string()))
    }
}

/// Lowercase RFC 1123 subdomain, the naming rule for service accounts and secrets
fn is_dns_subdomain(name: &str) -> bool {
    let alphanumeric = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();
    !name.is_empty()
        && name.len() <= 253
        && name.starts_with(alphanumeric)
        && name.ends_with(alphanumeric)
        && name.chars().all(|c| alphanumeric(c) || c == '-' || c == '.')
}

#[async_trait]
impl ServiceAccountGetter for HttpServiceAccountGetter {
    async fn get_service_account(
        &self,
        name: &str,
    ) -> Result<Option<ServiceAccount>, IdentityError> {
        let resource: Option<ServiceAccountResource> =
            self.fetch("serviceaccounts", name).await?;
        Ok(resource.map(|resource| ServiceAccount {
            name: resource.metadata.name,
            annotations: resource.metadata.annotations,
        }))
    }

    async fn get_secret(&self, reference: &str) -> Result<Option<String>, IdentityError> {
        let Some(secret) = self.fetch::<SecretResource>("secrets", reference).await? else {
            return Ok(None);
        };
        let Some(encoded) = secret.data.get(SECRET_TOKEN_KEY) else {
            return Ok(None);
        };

        let decoded = BASE64_STANDARD
            .decode(encoded)
            .map_err(|e| IdentityError::InvalidResponse(format!("secret data: {}", e)))?;
        String::from_utf8(decoded)
            .map(Some)
            .map_err(|e| IdentityError::InvalidResponse(format!("secret data: {}", e)))
    }
}

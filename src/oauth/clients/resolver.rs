//! Two-tier client resolution.
//!
//! Explicitly registered clients always win. When none exists, an
//! OAuth-enabled service account of the same name is turned into an
//! [`ImplicitClient`] on the fly from its annotations.

use crate::errors::RegistryError;
use crate::oauth::clients::service_accounts::{ServiceAccount, ServiceAccountGetter};
use crate::oauth::types::{GrantMethod, ImplicitClient, ResolvedClient};
use crate::registry::clients::ClientRegistry;
use crate::storage::Deadline;
use crate::storage::traits::Result;
use std::sync::Arc;

/// Marker annotation, must be `"true"`
pub const OAUTH_ENABLED_ANNOTATION: &str = "serviceaccounts.openshift.io/oauth-enabled";
/// Prefix of redirect URI annotations, one URI per key
pub const OAUTH_REDIRECT_URI_ANNOTATION_PREFIX: &str =
    "serviceaccounts.openshift.io/oauth-redirecturi.";
/// Name of the secret holding the client secret
pub const OAUTH_SECRET_REF_ANNOTATION: &str = "serviceaccounts.openshift.io/oauth-secret-ref";
/// Optional grant method override
pub const OAUTH_GRANT_METHOD_ANNOTATION: &str = "serviceaccounts.openshift.io/oauth-grant-method";

pub struct CombinedClientResolver {
    clients: Arc<ClientRegistry>,
    service_accounts: Arc<dyn ServiceAccountGetter>,
    default_grant_method: GrantMethod,
}

impl CombinedClientResolver {
    pub fn new(
        clients: Arc<ClientRegistry>,
        service_accounts: Arc<dyn ServiceAccountGetter>,
        default_grant_method: GrantMethod,
    ) -> Self {
        Self {
            clients,
            service_accounts,
            default_grant_method,
        }
    }

    pub fn default_grant_method(&self) -> GrantMethod {
        self.default_grant_method
    }

    /// Resolve a client by name, falling back to an OAuth-enabled service account
    pub async fn resolve(&self, name: &str, deadline: Deadline) -> Result<ResolvedClient> {
        match self.clients.get(name, deadline).await {
            Ok(client) => return Ok(ResolvedClient::Explicit(client.resource)),
            Err(RegistryError::NotFound(_)) => {}
            Err(err) => return Err(err),
        }

        deadline
            .run("resolve service account client", async {
                let account = self
                    .service_accounts
                    .get_service_account(name)
                    .await?
                    .ok_or_else(|| RegistryError::NotFound(format!("client {}", name)))?;

                let annotations = match OAuthAnnotations::parse(&account) {
                    Ok(annotations) => annotations,
                    Err(reason) => {
                        tracing::debug!(client = name, reason, "service account is not an oauth client");
                        return Err(RegistryError::NotFound(format!("client {}", name)));
                    }
                };

                let secret = self
                    .service_accounts
                    .get_secret(&annotations.secret_ref)
                    .await?
                    .filter(|secret| !secret.is_empty());
                let Some(secret) = secret else {
                    tracing::debug!(
                        client = name,
                        secret_ref = %annotations.secret_ref,
                        "service account secret reference does not resolve"
                    );
                    return Err(RegistryError::NotFound(format!("client {}", name)));
                };

                Ok(ResolvedClient::Implicit(ImplicitClient {
                    name: account.name,
                    secret,
                    redirect_uris: annotations.redirect_uris,
                    grant_method: annotations.grant_method,
                }))
            })
            .await
    }

    /// Client override if set, else the process-wide default
    pub fn effective_grant_method(&self, client: &ResolvedClient) -> GrantMethod {
        client.grant_method().unwrap_or(self.default_grant_method)
    }

    /// Constant-time secret check against either kind of client
    pub async fn validate_secret(
        &self,
        name: &str,
        provided_secret: &str,
        deadline: Deadline,
    ) -> Result<bool> {
        let client = self.resolve(name, deadline).await?;
        Ok(client.secret_matches(provided_secret))
    }
}

/// The OAuth annotations of a service account, once validated
#[derive(Debug, PartialEq, Eq)]
struct OAuthAnnotations {
    redirect_uris: Vec<String>,
    secret_ref: String,
    grant_method: Option<GrantMethod>,
}

impl OAuthAnnotations {
    fn parse(account: &ServiceAccount) -> std::result::Result<Self, &'static str> {
        match account.annotations.get(OAUTH_ENABLED_ANNOTATION) {
            Some(value) if value.trim().eq_ignore_ascii_case("true") => {}
            Some(_) => return Err("oauth-enabled annotation is not \"true\""),
            None => return Err("missing oauth-enabled annotation"),
        }

        // BTreeMap iteration keeps the URI order stable across reads
        let redirect_uris: Vec<String> = account
            .annotations
            .iter()
            .filter(|(key, _)| key.starts_with(OAUTH_REDIRECT_URI_ANNOTATION_PREFIX))
            .map(|(_, value)| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .collect();
        if redirect_uris.is_empty() {
            return Err("no redirect URI annotations");
        }

        let secret_ref = account
            .annotations
            .get(OAUTH_SECRET_REF_ANNOTATION)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or("missing secret reference annotation")?;

        let grant_method = match account.annotations.get(OAUTH_GRANT_METHOD_ANNOTATION) {
            None => None,
            Some(value) => Some(
                value
                    .parse::<GrantMethod>()
                    .map_err(|_| "unparseable grant method annotation")?,
            ),
        };

        Ok(Self {
            redirect_uris,
            secret_ref,
            grant_method,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::clients::service_accounts::MemoryServiceAccountGetter;
    use crate::oauth::types::OAuthClient;
    use crate::storage::MemoryObjectStore;

    fn oauth_account(name: &str) -> ServiceAccount {
        ServiceAccount::new(name)
            .with_annotation(OAUTH_ENABLED_ANNOTATION, "true")
            .with_annotation(
                format!("{}first", OAUTH_REDIRECT_URI_ANNOTATION_PREFIX),
                "https://sa.example.com/callback",
            )
            .with_annotation(OAUTH_SECRET_REF_ANNOTATION, format!("{}-token", name))
    }

    async fn setup(default: GrantMethod) -> (CombinedClientResolver, Arc<ClientRegistry>, Arc<MemoryServiceAccountGetter>) {
        let clients = Arc::new(ClientRegistry::new(Arc::new(MemoryObjectStore::new()), "/oauth"));
        let accounts = Arc::new(MemoryServiceAccountGetter::new());
        let resolver = CombinedClientResolver::new(clients.clone(), accounts.clone(), default);
        (resolver, clients, accounts)
    }

    #[test]
    fn test_annotation_parsing() {
        let parsed = OAuthAnnotations::parse(
            &oauth_account("sa").with_annotation(OAUTH_GRANT_METHOD_ANNOTATION, "prompt"),
        )
        .unwrap();
        assert_eq!(parsed.redirect_uris, vec!["https://sa.example.com/callback"]);
        assert_eq!(parsed.secret_ref, "sa-token");
        assert_eq!(parsed.grant_method, Some(GrantMethod::Prompt));

        let disabled = oauth_account("sa").with_annotation(OAUTH_ENABLED_ANNOTATION, "false");
        assert!(OAuthAnnotations::parse(&disabled).is_err());

        let bad_method = oauth_account("sa").with_annotation(OAUTH_GRANT_METHOD_ANNOTATION, "maybe");
        assert!(OAuthAnnotations::parse(&bad_method).is_err());

        let mut no_redirects = oauth_account("sa");
        no_redirects
            .annotations
            .retain(|key, _| !key.starts_with(OAUTH_REDIRECT_URI_ANNOTATION_PREFIX));
        assert!(OAuthAnnotations::parse(&no_redirects).is_err());
    }

    #[tokio::test]
    async fn test_unannotated_service_account_is_not_found() {
        let (resolver, _, accounts) = setup(GrantMethod::Prompt).await;
        accounts.insert_service_account(ServiceAccount::new("plain")).await;

        assert!(matches!(
            resolver.resolve("plain", Deadline::none()).await,
            Err(RegistryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_secret_is_not_found() {
        let (resolver, _, accounts) = setup(GrantMethod::Prompt).await;
        accounts.insert_service_account(oauth_account("sa")).await;

        assert!(matches!(
            resolver.resolve("sa", Deadline::none()).await,
            Err(RegistryError::NotFound(_))
        ));

        accounts.insert_secret("sa-token", "token-value").await;
        let client = resolver.resolve("sa", Deadline::none()).await.unwrap();
        assert!(client.is_implicit());
        assert!(client.secret_matches("token-value"));
    }

    #[tokio::test]
    async fn test_effective_grant_method_falls_back_to_default() {
        let (resolver, clients, accounts) = setup(GrantMethod::Deny).await;
        accounts.insert_service_account(oauth_account("sa")).await;
        accounts.insert_secret("sa-token", "token-value").await;

        let implicit = resolver.resolve("sa", Deadline::none()).await.unwrap();
        assert_eq!(resolver.effective_grant_method(&implicit), GrantMethod::Deny);

        clients
            .create(
                &OAuthClient {
                    name: "web".to_string(),
                    secret: "s".to_string(),
                    additional_secrets: vec![],
                    redirect_uris: vec![],
                    grant_method: Some(GrantMethod::Auto),
                    public: false,
                    access_token_max_age_seconds: None,
                },
                Deadline::none(),
            )
            .await
            .unwrap();
        let explicit = resolver.resolve("web", Deadline::none()).await.unwrap();
        assert_eq!(resolver.effective_grant_method(&explicit), GrantMethod::Auto);
    }
}

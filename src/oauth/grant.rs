//! Consent decisions driven by a client's effective grant method.

use crate::oauth::clients::CombinedClientResolver;
use crate::oauth::types::{ClientAuthorization, GrantMethod, ResolvedClient};
use crate::registry::ClientAuthorizationRegistry;
use crate::storage::Deadline;
use crate::storage::traits::Result;
use std::sync::Arc;

/// Outcome of evaluating an authorization request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantDecision {
    /// Issue a code without asking the user
    Approve,
    /// Ask the user to approve the requested scopes
    Prompt,
    /// Refuse the request
    Deny,
}

pub struct GrantEvaluator {
    resolver: Arc<CombinedClientResolver>,
    authorizations: Arc<ClientAuthorizationRegistry>,
}

impl GrantEvaluator {
    pub fn new(
        resolver: Arc<CombinedClientResolver>,
        authorizations: Arc<ClientAuthorizationRegistry>,
    ) -> Self {
        Self {
            resolver,
            authorizations,
        }
    }

    /// Decide whether `user_name` may authorize `client` for `scopes`.
    ///
    /// Auto-approved requests are recorded as a client authorization.
    pub async fn decide(
        &self,
        client: &ResolvedClient,
        user_name: &str,
        scopes: &[String],
        deadline: Deadline,
    ) -> Result<GrantDecision> {
        let method = self.resolver.effective_grant_method(client);
        let decision = match method {
            GrantMethod::Deny => GrantDecision::Deny,
            GrantMethod::Auto => {
                self.authorizations
                    .grant(user_name, client.name(), scopes, deadline)
                    .await?;
                GrantDecision::Approve
            }
            GrantMethod::Prompt => {
                if self
                    .authorizations
                    .covers(user_name, client.name(), scopes, deadline)
                    .await?
                {
                    GrantDecision::Approve
                } else {
                    GrantDecision::Prompt
                }
            }
        };

        tracing::debug!(
            client = client.name(),
            user = user_name,
            %method,
            ?decision,
            "evaluated grant"
        );
        Ok(decision)
    }

    /// Record the user's answer to a prompt
    pub async fn approve(
        &self,
        client: &ResolvedClient,
        user_name: &str,
        scopes: &[String],
        deadline: Deadline,
    ) -> Result<ClientAuthorization> {
        self.authorizations
            .grant(user_name, client.name(), scopes, deadline)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::clients::{
        MemoryServiceAccountGetter, OAUTH_ENABLED_ANNOTATION, OAUTH_GRANT_METHOD_ANNOTATION,
        OAUTH_REDIRECT_URI_ANNOTATION_PREFIX, OAUTH_SECRET_REF_ANNOTATION, ServiceAccount,
    };
    use crate::registry::{ClientRegistry, DEFAULT_MAX_GRANT_ATTEMPTS};
    use crate::storage::traits::ObjectStore;
    use crate::storage::{MemoryObjectStore, SystemClock};

    async fn evaluator(default: GrantMethod) -> (GrantEvaluator, Arc<CombinedClientResolver>) {
        let objects: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
        let clients = Arc::new(ClientRegistry::new(objects.clone(), "/oauth"));
        let accounts = Arc::new(MemoryServiceAccountGetter::new());
        for (name, method) in [("auto-sa", Some("auto")), ("prompt-sa", Some("prompt")), ("plain-sa", None)] {
            let mut account = ServiceAccount::new(name)
                .with_annotation(OAUTH_ENABLED_ANNOTATION, "true")
                .with_annotation(
                    format!("{}one", OAUTH_REDIRECT_URI_ANNOTATION_PREFIX),
                    "https://sa.example.com/cb",
                )
                .with_annotation(OAUTH_SECRET_REF_ANNOTATION, "shared-token");
            if let Some(method) = method {
                account = account.with_annotation(OAUTH_GRANT_METHOD_ANNOTATION, method);
            }
            accounts.insert_service_account(account).await;
        }
        accounts.insert_secret("shared-token", "token").await;

        let resolver = Arc::new(CombinedClientResolver::new(clients, accounts, default));
        let authorizations = Arc::new(ClientAuthorizationRegistry::new(
            objects,
            "/oauth",
            resolver.clone(),
            Arc::new(SystemClock),
            DEFAULT_MAX_GRANT_ATTEMPTS,
        ));
        (GrantEvaluator::new(resolver.clone(), authorizations), resolver)
    }

    fn scopes(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_auto_approves_and_records() {
        let (evaluator, resolver) = evaluator(GrantMethod::Deny).await;
        let client = resolver.resolve("auto-sa", Deadline::none()).await.unwrap();

        let decision = evaluator
            .decide(&client, "u1", &scopes(&["user:info"]), Deadline::none())
            .await
            .unwrap();
        assert_eq!(decision, GrantDecision::Approve);
        assert!(evaluator
            .authorizations
            .covers("u1", "auto-sa", &scopes(&["user:info"]), Deadline::none())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_prompt_until_approved() {
        let (evaluator, resolver) = evaluator(GrantMethod::Deny).await;
        let client = resolver.resolve("prompt-sa", Deadline::none()).await.unwrap();
        let requested = scopes(&["user:info", "user:check-access"]);

        assert_eq!(
            evaluator.decide(&client, "u1", &requested, Deadline::none()).await.unwrap(),
            GrantDecision::Prompt
        );

        evaluator.approve(&client, "u1", &requested, Deadline::none()).await.unwrap();
        assert_eq!(
            evaluator.decide(&client, "u1", &requested, Deadline::none()).await.unwrap(),
            GrantDecision::Approve
        );
        assert_eq!(
            evaluator
                .decide(&client, "u1", &scopes(&["user:full"]), Deadline::none())
                .await
                .unwrap(),
            GrantDecision::Prompt
        );
    }

    #[tokio::test]
    async fn test_default_method_applies_without_override() {
        let (evaluator, resolver) = evaluator(GrantMethod::Deny).await;
        let client = resolver.resolve("plain-sa", Deadline::none()).await.unwrap();
        assert_eq!(
            evaluator
                .decide(&client, "u1", &scopes(&["user:info"]), Deadline::none())
                .await
                .unwrap(),
            GrantDecision::Deny
        );
    }
}

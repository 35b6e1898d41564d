//! Authorization code issuance and code-for-token exchange.

use crate::errors::RegistryError;
use crate::oauth::clients::CombinedClientResolver;
use crate::oauth::types::{AccessToken, AuthorizeToken, generate_token};
use crate::registry::{AccessTokenRegistry, AuthorizeTokenRegistry, resolve_token_client};
use crate::storage::traits::Result;
use crate::storage::{Clock, Deadline, Versioned};
use chrono::Duration;
use std::sync::Arc;

/// Fresh codes tried before a collision is reported
const TOKEN_GENERATION_ATTEMPTS: usize = 3;

/// Budget for putting a code back after a failed exchange
const RECOVERY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// What the authorization endpoint knows when it issues a code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeRequest {
    pub client_name: String,
    pub user_name: String,
    pub user_uid: Option<String>,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub state: Option<String>,
}

pub struct TokenIssuer {
    authorize_tokens: Arc<AuthorizeTokenRegistry>,
    access_tokens: Arc<AccessTokenRegistry>,
    resolver: Arc<CombinedClientResolver>,
    clock: Arc<dyn Clock>,
    authorize_token_lifetime: Duration,
    access_token_lifetime: Duration,
}

impl TokenIssuer {
    pub fn new(
        authorize_tokens: Arc<AuthorizeTokenRegistry>,
        access_tokens: Arc<AccessTokenRegistry>,
        resolver: Arc<CombinedClientResolver>,
        clock: Arc<dyn Clock>,
        authorize_token_lifetime: Duration,
        access_token_lifetime: Duration,
    ) -> Self {
        Self {
            authorize_tokens,
            access_tokens,
            resolver,
            clock,
            authorize_token_lifetime,
            access_token_lifetime,
        }
    }

    /// Mint and store a new authorization code
    pub async fn issue_code(&self, request: CodeRequest, deadline: Deadline) -> Result<AuthorizeToken> {
        let mut token = AuthorizeToken {
            name: String::new(),
            client_name: request.client_name,
            user_name: request.user_name,
            user_uid: request.user_uid,
            redirect_uri: request.redirect_uri,
            scopes: request.scopes,
            state: request.state,
            created_at: self.clock.now(),
            expires_in: self.authorize_token_lifetime.num_seconds(),
        };

        for _ in 0..TOKEN_GENERATION_ATTEMPTS {
            token.name = generate_token();
            match self.authorize_tokens.issue(&token, deadline).await {
                Err(RegistryError::AlreadyExists(_)) => continue,
                result => return result,
            }
        }
        Err(RegistryError::AlreadyExists(
            "could not generate an unused authorization code".to_string(),
        ))
    }

    /// Consume a code and issue the access token it stands for.
    ///
    /// A code is exchanged at most once; every later attempt fails with `NotFound`.
    /// When the client may not be issued tokens the code is left untouched. When
    /// storing the access token fails the code is put back, so the caller can retry.
    pub async fn exchange_code(&self, code: &str, deadline: Deadline) -> Result<AccessToken> {
        let pending = self.authorize_tokens.get(code, deadline).await?;
        resolve_token_client(&self.resolver, &pending.client_name, &pending.user_name, deadline)
            .await?;

        let consumed = self.authorize_tokens.consume(code, deadline).await?;
        let authorized = consumed.resource.clone();
        let mut token = AccessToken {
            name: String::new(),
            client_name: authorized.client_name,
            user_name: authorized.user_name,
            user_uid: authorized.user_uid,
            scopes: authorized.scopes,
            redirect_uri: authorized.redirect_uri,
            authorize_token: Some(authorized.name),
            refresh_token: None,
            created_at: self.clock.now(),
            expires_in: self.access_token_lifetime.num_seconds(),
        };

        let mut failure = RegistryError::AlreadyExists(
            "could not generate an unused access token".to_string(),
        );
        for _ in 0..TOKEN_GENERATION_ATTEMPTS {
            token.name = generate_token();
            match self.access_tokens.issue(&token, deadline).await {
                Ok(issued) => {
                    tracing::info!(
                        client = %issued.client_name,
                        user = %issued.user_name,
                        "exchanged authorization code for access token"
                    );
                    return Ok(issued);
                }
                Err(RegistryError::AlreadyExists(_)) => continue,
                Err(err) => {
                    failure = err;
                    break;
                }
            }
        }

        // A timed out write may still have landed
        let recovery = Deadline::after(RECOVERY_TIMEOUT);
        if let Ok(issued) = self.access_tokens.get(&token.name, recovery).await {
            if issued.authorize_token == token.authorize_token {
                return Ok(issued);
            }
        }
        self.restore_code(&consumed, recovery).await;
        Err(failure)
    }

    async fn restore_code(&self, consumed: &Versioned<AuthorizeToken>, deadline: Deadline) {
        let remaining = match consumed.expires_at {
            Some(expires_at) => expires_at - self.clock.now(),
            None => Duration::seconds(consumed.resource.expires_in),
        };
        if remaining <= Duration::zero() {
            return;
        }
        match self
            .authorize_tokens
            .restore(&consumed.resource, remaining, deadline)
            .await
        {
            Ok(()) => tracing::warn!(
                client = %consumed.resource.client_name,
                "access token issuance failed, authorization code restored"
            ),
            Err(err) => tracing::error!(
                client = %consumed.resource.client_name,
                error = ?err,
                "could not restore authorization code"
            ),
        }
    }
}

//! OAuth registry types and data structures.
//!
//! Defines the persisted entities (authorize tokens, access tokens, clients,
//! client authorizations), the derived implicit client, and the grant method
//! policy shared by all of them.

use base64::prelude::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use subtle::{Choice, ConstantTimeEq};

use crate::storage::typed::StoredResource;

/// Policy for whether token issuance needs prior user consent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantMethod {
    /// Always grant without asking the user
    Auto,
    /// Ask the user unless an existing authorization covers the scopes
    Prompt,
    /// Refuse issuance outright
    Deny,
}

impl fmt::Display for GrantMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            GrantMethod::Auto => "auto",
            GrantMethod::Prompt => "prompt",
            GrantMethod::Deny => "deny",
        };
        f.write_str(value)
    }
}

impl FromStr for GrantMethod {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "auto" => Ok(GrantMethod::Auto),
            "prompt" => Ok(GrantMethod::Prompt),
            "deny" => Ok(GrantMethod::Deny),
            _ => Err(value.to_string()),
        }
    }
}

/// Single-use authorization code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizeToken {
    /// The code itself
    pub name: String,
    pub client_name: String,
    pub user_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_uid: Option<String>,
    /// Redirect URI the code was bound to
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Lifetime in seconds, must be positive
    pub expires_in: i64,
}

impl StoredResource for AuthorizeToken {
    const KIND: &'static str = "oauthauthorizetokens";
    const SECRET_NAME: bool = true;

    fn name(&self) -> &str {
        &self.name
    }
}

/// Bearer access token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    /// The bearer token itself
    pub name: String,
    pub client_name: String,
    pub user_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_uid: Option<String>,
    pub scopes: Vec<String>,
    #[serde(default)]
    pub redirect_uri: String,
    /// Code this token was exchanged from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorize_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Lifetime in seconds; zero means the token does not expire
    pub expires_in: i64,
}

impl StoredResource for AccessToken {
    const KIND: &'static str = "oauthaccesstokens";
    const SECRET_NAME: bool = true;

    fn name(&self) -> &str {
        &self.name
    }
}

/// Explicitly registered OAuth client
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthClient {
    pub name: String,
    #[serde(default)]
    pub secret: String,
    /// Older secrets still accepted during rotation
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_secrets: Vec<String>,
    pub redirect_uris: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grant_method: Option<GrantMethod>,
    /// Public clients do not authenticate with a secret
    #[serde(default)]
    pub public: bool,
    /// Upper bound on the lifetime of access tokens issued to this client
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token_max_age_seconds: Option<i64>,
}

impl fmt::Debug for OAuthClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthClient")
            .field("name", &self.name)
            .field("secret", &"<redacted>")
            .field("additional_secrets", &self.additional_secrets.len())
            .field("redirect_uris", &self.redirect_uris)
            .field("grant_method", &self.grant_method)
            .field("public", &self.public)
            .field("access_token_max_age_seconds", &self.access_token_max_age_seconds)
            .finish()
    }
}

impl StoredResource for OAuthClient {
    const KIND: &'static str = "oauthclients";

    fn name(&self) -> &str {
        &self.name
    }
}

/// Scopes a user has granted a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientAuthorization {
    /// `<user_name>:<client_name>`, each part form-urlencoded
    pub name: String,
    pub user_name: String,
    pub client_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_uid: Option<String>,
    /// Sorted, de-duplicated
    pub scopes: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ClientAuthorization {
    /// Storage name for a (user, client) pair.
    ///
    /// Both parts are encoded so neither can contain the `:` separator.
    pub fn name_for(user_name: &str, client_name: &str) -> String {
        format!("{}:{}", encode_name_part(user_name), encode_name_part(client_name))
    }

    /// Whether this record belongs to exactly this user and client
    pub fn is_for(&self, user_name: &str, client_name: &str) -> bool {
        self.user_name == user_name && self.client_name == client_name
    }

    /// Whether every requested scope has already been granted
    pub fn covers(&self, requested: &[String]) -> bool {
        requested.iter().all(|scope| self.scopes.contains(scope))
    }
}

impl StoredResource for ClientAuthorization {
    const KIND: &'static str = "oauthclientauthorizations";

    fn name(&self) -> &str {
        &self.name
    }
}

fn encode_name_part(part: &str) -> String {
    url::form_urlencoded::byte_serialize(part.as_bytes()).collect()
}

/// Client synthesized from an OAuth-enabled service account. Never persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct ImplicitClient {
    pub name: String,
    pub secret: String,
    pub redirect_uris: Vec<String>,
    pub grant_method: Option<GrantMethod>,
}

impl fmt::Debug for ImplicitClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImplicitClient")
            .field("name", &self.name)
            .field("secret", &"<redacted>")
            .field("redirect_uris", &self.redirect_uris)
            .field("grant_method", &self.grant_method)
            .finish()
    }
}

/// A client as seen by token logic, whichever way it was found
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedClient {
    Explicit(OAuthClient),
    Implicit(ImplicitClient),
}

impl ResolvedClient {
    pub fn name(&self) -> &str {
        match self {
            ResolvedClient::Explicit(client) => &client.name,
            ResolvedClient::Implicit(client) => &client.name,
        }
    }

    pub fn redirect_uris(&self) -> &[String] {
        match self {
            ResolvedClient::Explicit(client) => &client.redirect_uris,
            ResolvedClient::Implicit(client) => &client.redirect_uris,
        }
    }

    /// Primary secret, absent for public clients
    pub fn secret(&self) -> Option<&str> {
        match self {
            ResolvedClient::Explicit(client) if client.public => None,
            ResolvedClient::Explicit(client) => Some(&client.secret),
            ResolvedClient::Implicit(client) => Some(&client.secret),
        }
    }

    pub fn grant_method(&self) -> Option<GrantMethod> {
        match self {
            ResolvedClient::Explicit(client) => client.grant_method,
            ResolvedClient::Implicit(client) => client.grant_method,
        }
    }

    pub fn is_public(&self) -> bool {
        matches!(self, ResolvedClient::Explicit(client) if client.public)
    }

    pub fn is_implicit(&self) -> bool {
        matches!(self, ResolvedClient::Implicit(_))
    }

    pub fn access_token_max_age_seconds(&self) -> Option<i64> {
        match self {
            ResolvedClient::Explicit(client) => client.access_token_max_age_seconds,
            ResolvedClient::Implicit(_) => None,
        }
    }

    pub fn allows_redirect_uri(&self, redirect_uri: &str) -> bool {
        self.redirect_uris().iter().any(|uri| uri == redirect_uri)
    }

    /// Constant-time check of `provided` against every accepted secret.
    ///
    /// Public clients accept any value. Every candidate is compared so the
    /// timing does not reveal which secret matched.
    pub fn secret_matches(&self, provided: &str) -> bool {
        let candidates: Vec<&str> = match self {
            ResolvedClient::Explicit(client) if client.public => return true,
            ResolvedClient::Explicit(client) => std::iter::once(client.secret.as_str())
                .chain(client.additional_secrets.iter().map(String::as_str))
                .collect(),
            ResolvedClient::Implicit(client) => vec![client.secret.as_str()],
        };

        let mut matched = Choice::from(0);
        for candidate in candidates.into_iter().filter(|c| !c.is_empty()) {
            matched |= candidate.as_bytes().ct_eq(provided.as_bytes());
        }
        matched.into()
    }
}

/// OAuth Error Response
#[derive(Debug, Serialize, Deserialize)]
pub struct OAuthErrorResponse {
    /// Error code
    pub error: String,
    /// Error description
    pub error_description: Option<String>,
    /// Error URI
    pub error_uri: Option<String>,
    /// State parameter (for authorization errors)
    pub state: Option<String>,
}

/// Generate a secure random token
pub fn generate_token() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.r#gen();
    base64::prelude::BASE64_URL_SAFE_NO_PAD.encode(bytes)
}

/// Union of two scope lists, sorted and de-duplicated
pub fn merge_scopes(existing: &[String], added: &[String]) -> Vec<String> {
    existing
        .iter()
        .chain(added.iter())
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Parse a space separated scope string
pub fn parse_scopes(scope: &str) -> Vec<String> {
    merge_scopes(&[], &scope.split_whitespace().map(str::to_string).collect::<Vec<_>>())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn explicit(secret: &str, additional: &[&str], public: bool) -> ResolvedClient {
        ResolvedClient::Explicit(OAuthClient {
            name: "web".to_string(),
            secret: secret.to_string(),
            additional_secrets: additional.iter().map(|s| s.to_string()).collect(),
            redirect_uris: vec!["https://app.example.com/callback".to_string()],
            grant_method: None,
            public,
            access_token_max_age_seconds: None,
        })
    }

    #[test]
    fn test_grant_method_parsing() {
        assert_eq!("auto".parse::<GrantMethod>(), Ok(GrantMethod::Auto));
        assert_eq!(" Prompt ".parse::<GrantMethod>(), Ok(GrantMethod::Prompt));
        assert_eq!("DENY".parse::<GrantMethod>(), Ok(GrantMethod::Deny));
        assert!("sometimes".parse::<GrantMethod>().is_err());
        assert_eq!(GrantMethod::Auto.to_string(), "auto");
    }

    #[test]
    fn test_merge_scopes_is_a_set_union() {
        let merged = merge_scopes(
            &["b".to_string(), "a".to_string()],
            &["a".to_string(), "c".to_string()],
        );
        assert_eq!(merged, vec!["a", "b", "c"]);
        assert_eq!(parse_scopes("user:info  user:info user:check-access"), vec![
            "user:check-access",
            "user:info"
        ]);
    }

    #[test]
    fn test_secret_matching() {
        let client = explicit("current", &["previous"], false);
        assert!(client.secret_matches("current"));
        assert!(client.secret_matches("previous"));
        assert!(!client.secret_matches("curren"));
        assert!(!client.secret_matches(""));

        let public = explicit("", &[], true);
        assert!(public.secret_matches("anything"));
        assert_eq!(public.secret(), None);
    }

    #[test]
    fn test_client_debug_redacts_secret() {
        let client = explicit("hunter2", &[], false);
        let rendered = format!("{:?}", client);
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_generated_tokens_are_unique() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
    }

    #[test]
    fn test_client_authorization_covers() {
        let now = Utc::now();
        let authorization = ClientAuthorization {
            name: ClientAuthorization::name_for("u1", "c1"),
            user_name: "u1".to_string(),
            client_name: "c1".to_string(),
            user_uid: None,
            scopes: vec!["a".to_string(), "b".to_string()],
            created_at: now,
            updated_at: now,
        };
        assert_eq!(authorization.name, "u1:c1");
        assert!(authorization.covers(&["a".to_string()]));
        assert!(!authorization.covers(&["a".to_string(), "c".to_string()]));
    }

    #[test]
    fn test_client_authorization_names_do_not_collide() {
        let first = ClientAuthorization::name_for("alice", "x:y");
        let second = ClientAuthorization::name_for("alice:x", "y");
        assert_ne!(first, second);
        assert_eq!(first.matches(':').count(), 1);
        assert_eq!(second.matches(':').count(), 1);
    }
}

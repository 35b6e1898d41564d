//! Environment-based configuration for the registry runtime.

use anyhow::Result;
use std::time::Duration;

use crate::errors::ConfigError;
use crate::oauth::types::GrantMethod;

/// Path prefix under which every registry kind is stored
#[derive(Clone, Debug)]
pub struct StoragePrefix(String);

/// Process-wide grant method for clients without their own
#[derive(Clone, Copy, Debug)]
pub struct ServiceAccountGrantMethod(GrantMethod);

/// Lifetime of authorization codes
#[derive(Clone, Copy, Debug)]
pub struct AuthorizeTokenExpiration(chrono::Duration);

/// Default lifetime of access tokens
#[derive(Clone, Copy, Debug)]
pub struct AccessTokenExpiration(chrono::Duration);

/// Whether access tokens may be issued without an expiry
#[derive(Clone, Copy, Debug)]
pub struct AllowNonExpiringAccessTokens(bool);

/// Attempts at merging a client authorization under contention
#[derive(Clone, Copy, Debug)]
pub struct ClientAuthorizationMaxRetries(usize);

/// HTTP client timeout configuration
#[derive(Clone, Copy, Debug)]
pub struct HttpClientTimeout(Duration);

/// Main application configuration
#[derive(Clone)]
pub struct Config {
    pub version: String,
    pub storage_backend: String,
    pub database_url: Option<String>,
    pub storage_prefix: StoragePrefix,
    pub service_account_grant_method: ServiceAccountGrantMethod,
    pub authorize_token_expiration: AuthorizeTokenExpiration,
    pub access_token_expiration: AccessTokenExpiration,
    pub allow_non_expiring_access_tokens: AllowNonExpiringAccessTokens,
    pub client_authorization_max_retries: ClientAuthorizationMaxRetries,
    pub identity_api_url: Option<String>,
    pub identity_api_token: Option<String>,
    pub identity_namespace: String,
    pub http_client_timeout: HttpClientTimeout,
    pub user_agent: String,
}

impl Config {
    /// Create a new configuration from environment variables
    pub fn new() -> Result<Self> {
        let default_user_agent = format!("oauth-registry/{}", version()?);
        let storage_backend = default_env("STORAGE_BACKEND", "memory");
        let database_url = optional_env("DATABASE_URL");
        let storage_prefix: StoragePrefix = default_env("STORAGE_PREFIX", "/oauth").try_into()?;
        let service_account_grant_method: ServiceAccountGrantMethod =
            optional_env("SERVICE_ACCOUNT_GRANT_METHOD").try_into()?;
        let authorize_token_expiration: AuthorizeTokenExpiration =
            default_env("AUTHORIZE_TOKEN_EXPIRATION", "5m").try_into()?;
        let access_token_expiration: AccessTokenExpiration =
            default_env("ACCESS_TOKEN_EXPIRATION", "1d").try_into()?;
        let allow_non_expiring_access_tokens: AllowNonExpiringAccessTokens =
            default_env("ALLOW_NON_EXPIRING_ACCESS_TOKENS", "false").try_into()?;
        let client_authorization_max_retries: ClientAuthorizationMaxRetries =
            default_env("CLIENT_AUTHORIZATION_MAX_RETRIES", "5").try_into()?;
        let identity_api_url = optional_env("IDENTITY_API_URL").filter(|url| !url.is_empty());
        let identity_api_token = optional_env("IDENTITY_API_TOKEN").filter(|token| !token.is_empty());
        let identity_namespace = default_env("IDENTITY_NAMESPACE", "default");
        let http_client_timeout: HttpClientTimeout =
            default_env("HTTP_CLIENT_TIMEOUT", "10s").try_into()?;
        let user_agent = default_env("USER_AGENT", &default_user_agent);

        Ok(Self {
            version: version()?,
            storage_backend,
            database_url,
            storage_prefix,
            service_account_grant_method,
            authorize_token_expiration,
            access_token_expiration,
            allow_non_expiring_access_tokens,
            client_authorization_max_retries,
            identity_api_url,
            identity_api_token,
            identity_namespace,
            http_client_timeout,
            user_agent,
        })
    }
}

/// Get application version from build environment
pub fn version() -> Result<String> {
    option_env!("GIT_HASH")
        .or(option_env!("CARGO_PKG_VERSION"))
        .map(|val| val.to_string())
        .ok_or(ConfigError::VersionNotSet.into())
}

pub(crate) fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn default_env(name: &str, default_value: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default_value.to_string())
}

fn parse_chrono_duration(value: String) -> Result<chrono::Duration> {
    let duration = duration_str::parse(&value)
        .map_err(|e| ConfigError::DurationParsingFailed(value, e.to_string()))?;
    Ok(chrono::Duration::from_std(duration)?)
}

impl TryFrom<String> for StoragePrefix {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let trimmed = value.trim();
        if !trimmed.starts_with('/') {
            return Err(ConfigError::InvalidStoragePrefix(value).into());
        }
        // "/" alone keeps its slash so keys stay absolute
        let normalized = match trimmed.trim_end_matches('/') {
            "" => "/",
            prefix => prefix,
        };
        Ok(Self(normalized.to_string()))
    }
}

impl AsRef<str> for StoragePrefix {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<Option<String>> for ServiceAccountGrantMethod {
    type Error = anyhow::Error;

    fn try_from(value: Option<String>) -> Result<Self, Self::Error> {
        let value = value.unwrap_or_default();
        if value.trim().is_empty() {
            return Ok(Self(GrantMethod::Deny));
        }
        value
            .parse::<GrantMethod>()
            .map(Self)
            .map_err(|_| ConfigError::InvalidGrantMethod(value).into())
    }
}

impl TryFrom<String> for ServiceAccountGrantMethod {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(Some(value))
    }
}

impl AsRef<GrantMethod> for ServiceAccountGrantMethod {
    fn as_ref(&self) -> &GrantMethod {
        &self.0
    }
}

impl TryFrom<String> for AuthorizeTokenExpiration {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let duration = parse_chrono_duration(value.clone())?;
        if duration <= chrono::Duration::zero() {
            return Err(ConfigError::DurationParsingFailed(
                value,
                "authorization codes must expire".to_string(),
            )
            .into());
        }
        Ok(Self(duration))
    }
}

impl AsRef<chrono::Duration> for AuthorizeTokenExpiration {
    fn as_ref(&self) -> &chrono::Duration {
        &self.0
    }
}

impl TryFrom<String> for AccessTokenExpiration {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Ok(Self(parse_chrono_duration(value)?))
    }
}

impl AsRef<chrono::Duration> for AccessTokenExpiration {
    fn as_ref(&self) -> &chrono::Duration {
        &self.0
    }
}

impl TryFrom<String> for AllowNonExpiringAccessTokens {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Self(true)),
            "false" | "0" | "no" | "off" => Ok(Self(false)),
            _ => Err(ConfigError::BoolParsingFailed(value).into()),
        }
    }
}

impl AsRef<bool> for AllowNonExpiringAccessTokens {
    fn as_ref(&self) -> &bool {
        &self.0
    }
}

impl TryFrom<String> for ClientAuthorizationMaxRetries {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.trim().parse::<usize>() {
            Ok(retries) if retries > 0 => Ok(Self(retries)),
            _ => Err(ConfigError::InvalidRetryCount(value).into()),
        }
    }
}

impl AsRef<usize> for ClientAuthorizationMaxRetries {
    fn as_ref(&self) -> &usize {
        &self.0
    }
}

impl TryFrom<String> for HttpClientTimeout {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.trim().is_empty() {
            return Ok(Self(Duration::from_secs(10)));
        }
        let timeout = duration_str::parse(&value)
            .map_err(|e| ConfigError::DurationParsingFailed(value.clone(), e.to_string()))?;
        if timeout.is_zero() {
            return Err(ConfigError::DurationParsingFailed(
                value,
                "HTTP client timeout must be positive".to_string(),
            )
            .into());
        }
        Ok(Self(timeout))
    }
}

impl AsRef<Duration> for HttpClientTimeout {
    fn as_ref(&self) -> &Duration {
        &self.0
    }
}

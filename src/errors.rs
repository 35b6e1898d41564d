//! Standardized error types following the `error-registry-<domain>-<number>` format.

use axum::Json;
use axum::response::{IntoResponse, Response};
use http::StatusCode;
use thiserror::Error;

use crate::oauth::types::OAuthErrorResponse;

/// Configuration errors that occur during application startup
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Error when version information is not available
    #[error("error-registry-config-1 One of GIT_HASH or CARGO_PKG_VERSION must be set")]
    VersionNotSet,

    /// Error when duration string cannot be parsed
    #[error("error-registry-config-2 Failed to parse duration '{0}': {1}")]
    DurationParsingFailed(String, String),

    /// Error when boolean string cannot be parsed
    #[error(
        "error-registry-config-3 Failed to parse boolean '{0}': expected true/false/1/0/yes/no/on/off"
    )]
    BoolParsingFailed(String),

    /// Error when a grant method is not one of auto, prompt or deny
    #[error("error-registry-config-4 Invalid grant method '{0}': expected auto, prompt or deny")]
    InvalidGrantMethod(String),

    /// Error when the retry bound cannot be parsed or is zero
    #[error("error-registry-config-5 Invalid retry count '{0}': expected a positive integer")]
    InvalidRetryCount(String),

    /// Error when the storage prefix is not an absolute path
    #[error("error-registry-config-6 Invalid storage prefix '{0}': must start with '/'")]
    InvalidStoragePrefix(String),
}

/// Errors returned by every registry operation.
///
/// Messages never carry resource versions or backend endpoints, so the
/// `Display` output is safe to hand to a transport layer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Identifier absent or expired
    #[error("error-registry-storage-1 Not found: {0}")]
    NotFound(String),

    /// Identifier collision on create
    #[error("error-registry-storage-2 Already exists: {0}")]
    AlreadyExists(String),

    /// Resource version mismatch on update
    #[error("error-registry-storage-3 Conflict: {0}")]
    Conflict(String),

    /// Caller-supplied deadline exceeded
    #[error("error-registry-storage-4 Deadline exceeded: {0}")]
    Timeout(String),

    /// Malformed entity or dangling reference
    #[error("error-registry-storage-5 Invalid input: {0}")]
    InvalidInput(String),

    /// Backing store or identity subsystem unreachable
    #[error("error-registry-storage-6 Unavailable: {0}")]
    Unavailable(String),

    /// One-shot registry construction failed
    #[error("error-registry-storage-7 Registry construction failed: {0}")]
    ConstructionFailed(String),

    /// The effective grant method refuses issuance for this client
    #[error("error-registry-grant-1 Grant denied: {0}")]
    GrantDenied(String),
}

impl RegistryError {
    /// Same kind, with `f` applied to the message
    pub(crate) fn map_message(self, f: impl FnOnce(String) -> String) -> Self {
        match self {
            RegistryError::NotFound(m) => RegistryError::NotFound(f(m)),
            RegistryError::AlreadyExists(m) => RegistryError::AlreadyExists(f(m)),
            RegistryError::Conflict(m) => RegistryError::Conflict(f(m)),
            RegistryError::Timeout(m) => RegistryError::Timeout(f(m)),
            RegistryError::InvalidInput(m) => RegistryError::InvalidInput(f(m)),
            RegistryError::Unavailable(m) => RegistryError::Unavailable(f(m)),
            RegistryError::ConstructionFailed(m) => RegistryError::ConstructionFailed(f(m)),
            RegistryError::GrantDenied(m) => RegistryError::GrantDenied(f(m)),
        }
    }

    /// Whether the caller may retry the same operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RegistryError::Conflict(_) | RegistryError::Timeout(_) | RegistryError::Unavailable(_)
        )
    }

    /// OAuth error code a transport should surface for this error.
    pub fn oauth_error_code(&self, subject: ErrorSubject) -> &'static str {
        match self {
            RegistryError::NotFound(_) => match subject {
                ErrorSubject::Grant => "invalid_grant",
                ErrorSubject::Client => "invalid_client",
                ErrorSubject::Token => "invalid_token",
            },
            RegistryError::AlreadyExists(_) | RegistryError::InvalidInput(_) => "invalid_request",
            RegistryError::Conflict(_)
            | RegistryError::Timeout(_)
            | RegistryError::Unavailable(_) => "temporarily_unavailable",
            RegistryError::ConstructionFailed(_) => "server_error",
            RegistryError::GrantDenied(_) => "access_denied",
        }
    }

    fn status_code(&self, subject: ErrorSubject) -> StatusCode {
        match self.oauth_error_code(subject) {
            "invalid_client" | "invalid_token" => StatusCode::UNAUTHORIZED,
            "access_denied" => StatusCode::FORBIDDEN,
            "temporarily_unavailable" => StatusCode::SERVICE_UNAVAILABLE,
            "server_error" => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    fn public_description(&self) -> &'static str {
        match self {
            RegistryError::NotFound(_) => "The referenced credential or client does not exist",
            RegistryError::AlreadyExists(_) => "The credential already exists",
            RegistryError::Conflict(_) => "The resource was modified concurrently, retry",
            RegistryError::Timeout(_) => "The request did not complete in time, retry",
            RegistryError::InvalidInput(_) => "The request is malformed",
            RegistryError::Unavailable(_) => "The service is temporarily unavailable",
            RegistryError::ConstructionFailed(_) => "The server is not able to serve requests",
            RegistryError::GrantDenied(_) => "The client is not permitted to obtain tokens",
        }
    }
}

/// What a registry error is about, which decides the OAuth error code for `NotFound`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSubject {
    Grant,
    Client,
    Token,
}

/// A registry error rendered as an OAuth error response.
#[derive(Debug)]
pub struct OAuthRejection {
    pub error: RegistryError,
    pub subject: ErrorSubject,
}

impl OAuthRejection {
    pub fn new(error: RegistryError, subject: ErrorSubject) -> Self {
        Self { error, subject }
    }
}

impl IntoResponse for OAuthRejection {
    fn into_response(self) -> Response {
        let status = self.error.status_code(self.subject);
        if status.is_server_error() {
            tracing::error!(error = ?self.error, "registry request failed");
        } else {
            tracing::debug!(error = ?self.error, "registry request rejected");
        }

        let body = OAuthErrorResponse {
            error: self.error.oauth_error_code(self.subject).to_string(),
            error_description: Some(self.error.public_description().to_string()),
            error_uri: None,
            state: None,
        };
        (status, Json(body)).into_response()
    }
}

/// Errors from the identity subsystem that owns service accounts
#[derive(Debug, Error)]
pub enum IdentityError {
    /// Error when the identity API cannot be reached
    #[error("error-registry-identity-1 Request failed: {0}")]
    RequestFailed(String),

    /// Error when the identity API answers with an unexpected payload
    #[error("error-registry-identity-2 Invalid response: {0}")]
    InvalidResponse(String),
}

impl From<IdentityError> for RegistryError {
    fn from(err: IdentityError) -> Self {
        RegistryError::Unavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(RegistryError::Conflict("x".into()).is_retryable());
        assert!(RegistryError::Timeout("x".into()).is_retryable());
        assert!(RegistryError::Unavailable("x".into()).is_retryable());
        assert!(!RegistryError::NotFound("x".into()).is_retryable());
        assert!(!RegistryError::ConstructionFailed("x".into()).is_retryable());
    }

    #[test]
    fn test_not_found_code_depends_on_subject() {
        let err = RegistryError::NotFound("abc".into());
        assert_eq!(err.oauth_error_code(ErrorSubject::Grant), "invalid_grant");
        assert_eq!(err.oauth_error_code(ErrorSubject::Client), "invalid_client");
        assert_eq!(err.oauth_error_code(ErrorSubject::Token), "invalid_token");
        assert_eq!(
            RegistryError::GrantDenied("c1".into()).oauth_error_code(ErrorSubject::Grant),
            "access_denied"
        );
    }

    #[test]
    fn test_rejection_status_codes() {
        let response = OAuthRejection::new(
            RegistryError::NotFound("abc".into()),
            ErrorSubject::Client,
        )
        .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = OAuthRejection::new(
            RegistryError::Unavailable("pool closed".into()),
            ErrorSubject::Grant,
        )
        .into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}

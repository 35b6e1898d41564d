//! Typed registries for tokens, clients and client authorizations.
//!
//! Every operation takes a [`Deadline`](crate::storage::Deadline) and returns a
//! [`RegistryError`] kind a transport can map onto an OAuth rejection.

pub mod access_tokens;
pub mod authorize_tokens;
pub mod client_authorizations;
pub mod clients;
pub mod factory;

pub use access_tokens::{AccessTokenPolicy, AccessTokenRegistry};
pub use authorize_tokens::AuthorizeTokenRegistry;
pub use client_authorizations::{ClientAuthorizationRegistry, DEFAULT_MAX_GRANT_ATTEMPTS};
pub use clients::ClientRegistry;
pub use factory::{
    BackendRegistryBuilder, RegistryBuilder, RegistrySet, RegistrySettings, StorageFactory,
};

use crate::errors::RegistryError;
use crate::oauth::clients::CombinedClientResolver;
use crate::oauth::types::{GrantMethod, ResolvedClient};
use crate::storage::Deadline;
use crate::storage::traits::Result;

/// Check that a token refers to a resolvable client and a user, and that the
/// client may be issued tokens at all.
pub(crate) async fn resolve_token_client(
    resolver: &CombinedClientResolver,
    client_name: &str,
    user_name: &str,
    deadline: Deadline,
) -> Result<ResolvedClient> {
    if client_name.is_empty() {
        return Err(RegistryError::InvalidInput(
            "client name is required".to_string(),
        ));
    }
    if user_name.is_empty() {
        return Err(RegistryError::InvalidInput("user name is required".to_string()));
    }

    let client = match resolver.resolve(client_name, deadline).await {
        Ok(client) => client,
        Err(RegistryError::NotFound(_)) => {
            return Err(RegistryError::InvalidInput(format!(
                "client {} does not exist",
                client_name
            )));
        }
        Err(err) => return Err(err),
    };

    if resolver.effective_grant_method(&client) == GrantMethod::Deny {
        tracing::info!(client = client_name, user = user_name, "token issuance denied by grant method");
        return Err(RegistryError::GrantDenied(format!(
            "client {} may not be issued tokens",
            client_name
        )));
    }

    Ok(client)
}

pub(crate) fn require_name(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(RegistryError::InvalidInput(format!("{} name is required", kind)));
    }
    Ok(())
}

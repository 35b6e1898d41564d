//! OAuth entities, client resolution and the consent and issuance flows built on the registries.

pub mod clients;
pub mod grant;
pub mod issuer;
pub mod types;

pub use clients::{CombinedClientResolver, ServiceAccount, ServiceAccountGetter};
pub use grant::{GrantDecision, GrantEvaluator};
pub use issuer::{CodeRequest, TokenIssuer};
pub use types::{
    AccessToken, AuthorizeToken, ClientAuthorization, GrantMethod, ImplicitClient, OAuthClient,
    OAuthErrorResponse, ResolvedClient, generate_token, merge_scopes, parse_scopes,
};

//! OAuth client resolution.
//!
//! Clients are either registered explicitly or derived from annotated service
//! accounts owned by the identity subsystem.

pub mod resolver;
pub mod service_accounts;

pub use resolver::{
    CombinedClientResolver, OAUTH_ENABLED_ANNOTATION, OAUTH_GRANT_METHOD_ANNOTATION,
    OAUTH_REDIRECT_URI_ANNOTATION_PREFIX, OAUTH_SECRET_REF_ANNOTATION,
};
pub use service_accounts::{
    HttpServiceAccountGetter, MemoryServiceAccountGetter, SECRET_TOKEN_KEY, ServiceAccount,
    ServiceAccountGetter,
};

//! OAuth token and client registry library crate.
//!
//! Persists authorization codes, access tokens, OAuth clients and the scopes
//! users have granted to clients on top of a transactional object store, and
//! resolves clients either from explicit registrations or from annotated
//! service accounts.

pub mod config;
pub mod errors;
pub mod oauth;
pub mod registry;
pub mod storage;

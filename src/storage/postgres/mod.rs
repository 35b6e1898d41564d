//! PostgreSQL storage implementations
//!
//! This module provides a PostgreSQL-backed object store.
//! PostgreSQL is suitable for production deployments with high availability requirements.

mod objects;

pub use objects::PostgresObjectStore;

//! In-memory storage implementations
//!
//! This module provides an in-memory implementation of the object store.
//! It is suitable for development and testing.

mod objects;

pub use objects::MemoryObjectStore;

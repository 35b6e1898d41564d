//! Caller-supplied deadlines for registry operations.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use crate::errors::RegistryError;

/// Point in time after which an operation fails with `Timeout`.
///
/// An operation whose deadline has already passed is rejected before it
/// touches the backing store. One that runs out mid-flight is dropped at its
/// next suspension point; every store call is single-item atomic, so state is
/// either unchanged or fully written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// No deadline
    pub fn none() -> Self {
        Self(None)
    }

    pub fn after(duration: Duration) -> Self {
        Self(Some(Instant::now() + duration))
    }

    pub fn at(instant: Instant) -> Self {
        Self(Some(instant))
    }

    pub fn is_expired(&self) -> bool {
        self.0.is_some_and(|at| at <= Instant::now())
    }

    /// Run `operation` under this deadline.
    pub async fn run<T, F>(self, operation: &str, fut: F) -> Result<T, RegistryError>
    where
        F: Future<Output = Result<T, RegistryError>>,
    {
        match self.0 {
            None => fut.await,
            Some(_) if self.is_expired() => Err(RegistryError::Timeout(operation.to_string())),
            Some(at) => tokio::time::timeout_at(at, fut)
                .await
                .unwrap_or_else(|_| Err(RegistryError::Timeout(operation.to_string()))),
        }
    }
}

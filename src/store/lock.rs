//! Run a closure under the store's distributed mutex

use std::future::Future;
use std::time::Duration;

use super::CoordinationStore;
use crate::error::{Error, Result};

/// Execute `operation` while holding the distributed lock `name`
///
/// The lock is always released once the operation finishes, whatever it
/// returned. When the lock cannot be acquired within `timeout` the operation
/// is not run and [`Error::LockTimeout`] is returned.
pub async fn with_lock<S, T, F, Fut>(
    store: &S,
    name: &str,
    timeout: Duration,
    operation: F,
) -> Result<T>
where
    S: CoordinationStore + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let token = store
        .acquire_lock(name, timeout)
        .await?
        .ok_or_else(|| Error::lock_timeout(name, timeout))?;

    tracing::trace!(lock = name, "Distributed lock acquired");

    let result = operation().await;

    if let Err(e) = store.release_lock(token).await {
        // Session loss already released it on the store side
        tracing::warn!(lock = name, error = %e, "Failed to release distributed lock");
    }

    result
}

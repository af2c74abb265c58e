use std::time::Duration;

use async_trait::async_trait;
use flowlatch_core::AppResult;
use flowlatch_domain::LockRequest;

/// One lease granted by a distributed lock client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockLease {
    /// Lock key the lease was granted for.
    pub key: String,
    /// Ownership token used for compare-and-delete release.
    pub token: String,
    /// Lease holder identity.
    pub holder_id: String,
    /// Hold duration the lease was granted with.
    pub hold_duration: Duration,
}

/// Distributed mutual-exclusion port for workflow locks.
///
/// Implementations must provide cross-process exclusion per key and lease
/// semantics: a granted lock is released automatically once its hold
/// duration elapses.
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Waits up to the request acquire timeout for exclusive ownership of the key.
    ///
    /// Returns `None` when the lock could not be obtained in time.
    async fn try_acquire_lock(
        &self,
        request: &LockRequest,
        holder_id: &str,
    ) -> AppResult<Option<LockLease>>;

    /// Releases one lease. Releasing an expired or already released lease is a no-op.
    async fn release_lock(&self, lease: &LockLease) -> AppResult<()>;

    /// Extends one lease and returns false when token ownership was lost.
    async fn renew_lock(&self, lease: &LockLease, hold_duration: Duration) -> AppResult<bool>;

    /// Returns whether any live lease currently exists for the key.
    async fn is_lock_acquired(&self, key: &str) -> AppResult<bool>;
}

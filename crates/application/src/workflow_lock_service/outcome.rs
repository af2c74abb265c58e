use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;

use flowlatch_core::AppResult;

use crate::lock_ports::{DistributedLock, LockLease};

/// Held workflow lock. Releasing consumes the handle, so it happens at most once.
///
/// A handle dropped without release stays held until its lease expires.
pub struct WorkflowLock {
    client: Arc<dyn DistributedLock>,
    lease: LockLease,
}

impl WorkflowLock {
    pub(crate) fn new(client: Arc<dyn DistributedLock>, lease: LockLease) -> Self {
        Self { client, lease }
    }

    /// Returns the locked key.
    #[must_use]
    pub fn key(&self) -> &str {
        self.lease.key.as_str()
    }

    /// Returns the lease holder identity.
    #[must_use]
    pub fn holder_id(&self) -> &str {
        self.lease.holder_id.as_str()
    }

    /// Returns the underlying lease.
    #[must_use]
    pub fn lease(&self) -> &LockLease {
        &self.lease
    }

    /// Extends the lease and returns false when it was already lost.
    pub async fn renew(&self, hold_duration: Duration) -> AppResult<bool> {
        self.client.renew_lock(&self.lease, hold_duration).await
    }

    /// Releases the lock. A lease that already expired is left untouched.
    pub async fn release(self) -> AppResult<()> {
        self.client.release_lock(&self.lease).await
    }
}

impl Debug for WorkflowLock {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("WorkflowLock")
            .field("lease", &self.lease)
            .finish_non_exhaustive()
    }
}

/// Result of one workflow lock attempt.
#[derive(Debug)]
#[must_use]
pub enum LockOutcome {
    /// No lock was required; the caller may proceed and has nothing to release.
    Skipped,
    /// The lock is held by the caller until released or expired.
    Acquired(WorkflowLock),
    /// The lock was not obtained; the protected section must not run.
    Denied,
}

impl LockOutcome {
    /// Returns whether the protected section may run.
    #[must_use]
    pub fn is_permitted(&self) -> bool {
        !matches!(self, Self::Denied)
    }

    /// Returns whether a lock is actually held.
    #[must_use]
    pub fn is_acquired(&self) -> bool {
        matches!(self, Self::Acquired(_))
    }

    /// Returns the held lock, if any.
    #[must_use]
    pub fn into_lock(self) -> Option<WorkflowLock> {
        match self {
            Self::Acquired(lock) => Some(lock),
            Self::Skipped | Self::Denied => None,
        }
    }

    /// Releases the held lock. Skipped and denied outcomes have nothing to release.
    pub async fn release(self) -> AppResult<()> {
        match self {
            Self::Acquired(lock) => lock.release().await,
            Self::Skipped | Self::Denied => Ok(()),
        }
    }
}

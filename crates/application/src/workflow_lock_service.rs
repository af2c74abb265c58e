use std::future::Future;
use std::sync::Arc;

use flowlatch_core::{AppResult, NonEmptyString};
use flowlatch_domain::{
    LockRequest, WorkflowInstanceDescriptor, WorkflowTypeDescriptor, resolve_instance_lock,
    resolve_type_lock,
};
use tracing::{debug, warn};

use crate::lock_ports::DistributedLock;

mod outcome;

pub use outcome::{LockOutcome, WorkflowLock};

/// Workflow lock orchestration over an injected distributed lock client.
#[derive(Clone)]
pub struct WorkflowLockService {
    lock: Arc<dyn DistributedLock>,
    holder_id: NonEmptyString,
}

impl WorkflowLockService {
    /// Creates a workflow lock service for one lock holder identity.
    pub fn new(lock: Arc<dyn DistributedLock>, holder_id: impl Into<String>) -> AppResult<Self> {
        Ok(Self {
            lock,
            holder_id: NonEmptyString::new(holder_id)?,
        })
    }

    /// Returns the lock holder identity used for every acquisition.
    #[must_use]
    pub fn holder_id(&self) -> &str {
        self.holder_id.as_str()
    }

    /// Tries to lock a workflow type when it is a singleton or the event is exclusive.
    ///
    /// Returns [`LockOutcome::Skipped`] without contacting the lock client when
    /// neither applies.
    pub async fn try_acquire_workflow_type_lock(
        &self,
        workflow_type: &WorkflowTypeDescriptor,
        is_exclusive_event: bool,
    ) -> LockOutcome {
        let Some(request) = resolve_type_lock(workflow_type, is_exclusive_event) else {
            debug!(
                workflow_type_id = %workflow_type.workflow_type_id(),
                "workflow type lock not required"
            );
            return LockOutcome::Skipped;
        };

        self.acquire(request).await
    }

    /// Tries to lock one workflow instance.
    pub async fn try_acquire_workflow_lock(
        &self,
        workflow: &WorkflowInstanceDescriptor,
    ) -> LockOutcome {
        self.acquire(resolve_instance_lock(workflow)).await
    }

    /// Runs an operation under the workflow type lock.
    ///
    /// Returns `Ok(None)` without running the operation when the lock is denied.
    /// An acquired lock is released on success and on error.
    pub async fn run_with_workflow_type_lock<T, F, Fut>(
        &self,
        workflow_type: &WorkflowTypeDescriptor,
        is_exclusive_event: bool,
        operation: F,
    ) -> AppResult<Option<T>>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = AppResult<T>> + Send,
        T: Send,
    {
        let outcome = self
            .try_acquire_workflow_type_lock(workflow_type, is_exclusive_event)
            .await;

        run_guarded(outcome, operation).await
    }

    /// Runs an operation under the workflow instance lock.
    ///
    /// Returns `Ok(None)` without running the operation when the lock is denied.
    pub async fn run_with_workflow_lock<T, F, Fut>(
        &self,
        workflow: &WorkflowInstanceDescriptor,
        operation: F,
    ) -> AppResult<Option<T>>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = AppResult<T>> + Send,
        T: Send,
    {
        let outcome = self.try_acquire_workflow_lock(workflow).await;

        run_guarded(outcome, operation).await
    }

    async fn acquire(&self, request: LockRequest) -> LockOutcome {
        match self
            .lock
            .try_acquire_lock(&request, self.holder_id.as_str())
            .await
        {
            Ok(Some(lease)) => {
                debug!(
                    key = %lease.key,
                    holder_id = %lease.holder_id,
                    hold_ms = u64::try_from(lease.hold_duration.as_millis()).unwrap_or(u64::MAX),
                    "workflow lock acquired"
                );
                LockOutcome::Acquired(WorkflowLock::new(self.lock.clone(), lease))
            }
            Ok(None) => {
                debug!(
                    key = %request.key(),
                    holder_id = %self.holder_id,
                    "workflow lock denied"
                );
                LockOutcome::Denied
            }
            Err(error) => {
                warn!(
                    key = %request.key(),
                    holder_id = %self.holder_id,
                    error = %error,
                    "workflow lock acquisition failed; treating as denied"
                );
                LockOutcome::Denied
            }
        }
    }
}

async fn run_guarded<T, F, Fut>(outcome: LockOutcome, operation: F) -> AppResult<Option<T>>
where
    F: FnOnce() -> Fut + Send,
    Fut: Future<Output = AppResult<T>> + Send,
    T: Send,
{
    if !outcome.is_permitted() {
        return Ok(None);
    }

    let result = operation().await;

    if let Err(release_error) = outcome.release().await {
        warn!(
            error = %release_error,
            "failed to release workflow lock; lease will expire on its own"
        );
    }

    result.map(Some)
}

//! Lock policy resolution for workflow types and workflow instances.
//!
//! Resolution is pure: it derives the lock key from the subject identity and
//! normalizes the configured timeout and expiration. Acquiring the lock is the
//! job of a distributed lock client.

use std::time::Duration;

use flowlatch_core::{AppError, AppResult};

use crate::workflow::{
    WorkflowId, WorkflowInstanceDescriptor, WorkflowTypeDescriptor, WorkflowTypeId,
};

/// Fallback used for any non-positive configured lock timeout or expiration.
pub const DEFAULT_LOCK_DURATION: Duration = Duration::from_millis(20_000);

/// Key prefix for workflow type locks.
pub const WORKFLOW_TYPE_LOCK_PREFIX: &str = "WFT_";

/// Key prefix for workflow instance locks.
pub const WORKFLOW_INSTANCE_LOCK_PREFIX: &str = "WFI_";

/// Key suffix shared by every workflow lock.
pub const LOCK_KEY_SUFFIX: &str = "_LOCK";

/// Subject protected by one workflow lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockSubject<'a> {
    /// Every execution of one workflow type.
    WorkflowType(&'a WorkflowTypeId),
    /// One running workflow instance.
    WorkflowInstance(&'a WorkflowId),
}

impl LockSubject<'_> {
    /// Returns the key namespace of this subject kind.
    #[must_use]
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::WorkflowType(_) => WORKFLOW_TYPE_LOCK_PREFIX,
            Self::WorkflowInstance(_) => WORKFLOW_INSTANCE_LOCK_PREFIX,
        }
    }

    /// Returns the subject identity.
    #[must_use]
    pub fn identity(&self) -> &str {
        match self {
            Self::WorkflowType(workflow_type_id) => workflow_type_id.as_str(),
            Self::WorkflowInstance(workflow_id) => workflow_id.as_str(),
        }
    }

    /// Returns the lock key for this subject.
    #[must_use]
    pub fn lock_key(&self) -> String {
        format!("{}{}{LOCK_KEY_SUFFIX}", self.prefix(), self.identity())
    }
}

/// Lock parameters handed to a distributed lock client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRequest {
    key: String,
    acquire_timeout: Duration,
    hold_duration: Duration,
}

impl LockRequest {
    /// Creates a validated lock request.
    pub fn new(
        key: impl Into<String>,
        acquire_timeout: Duration,
        hold_duration: Duration,
    ) -> AppResult<Self> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(AppError::Validation("lock key must not be empty".to_owned()));
        }

        if hold_duration.is_zero() {
            return Err(AppError::Validation(
                "lock hold duration must be greater than zero".to_owned(),
            ));
        }

        Ok(Self {
            key,
            acquire_timeout,
            hold_duration,
        })
    }

    fn for_subject(
        subject: LockSubject<'_>,
        lock_timeout_ms: i64,
        lock_expiration_ms: i64,
    ) -> Self {
        Self {
            key: subject.lock_key(),
            acquire_timeout: effective_duration(lock_timeout_ms),
            hold_duration: effective_duration(lock_expiration_ms),
        }
    }

    /// Returns the lock key.
    #[must_use]
    pub fn key(&self) -> &str {
        self.key.as_str()
    }

    /// Returns how long a contender may wait to acquire the lock.
    #[must_use]
    pub fn acquire_timeout(&self) -> Duration {
        self.acquire_timeout
    }

    /// Returns how long the lock is held before automatic release.
    #[must_use]
    pub fn hold_duration(&self) -> Duration {
        self.hold_duration
    }
}

/// Resolves the type-level lock, or `None` when execution needs no lock.
#[must_use]
pub fn resolve_type_lock(
    workflow_type: &WorkflowTypeDescriptor,
    is_exclusive_event: bool,
) -> Option<LockRequest> {
    if !workflow_type.requires_lock(is_exclusive_event) {
        return None;
    }

    Some(LockRequest::for_subject(
        LockSubject::WorkflowType(workflow_type.workflow_type_id()),
        workflow_type.lock_timeout_ms(),
        workflow_type.lock_expiration_ms(),
    ))
}

/// Resolves the instance-level lock. Instances are always locked.
#[must_use]
pub fn resolve_instance_lock(workflow: &WorkflowInstanceDescriptor) -> LockRequest {
    LockRequest::for_subject(
        LockSubject::WorkflowInstance(workflow.workflow_id()),
        workflow.lock_timeout_ms(),
        workflow.lock_expiration_ms(),
    )
}

fn effective_duration(configured_ms: i64) -> Duration {
    u64::try_from(configured_ms)
        .ok()
        .filter(|milliseconds| *milliseconds > 0)
        .map_or(DEFAULT_LOCK_DURATION, Duration::from_millis)
}

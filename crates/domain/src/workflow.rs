use std::fmt::{Display, Formatter};

use flowlatch_core::{AppResult, NonEmptyString};
use serde::{Deserialize, Serialize};

/// Stable identifier of one workflow type definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowTypeId(NonEmptyString);

impl WorkflowTypeId {
    /// Creates a validated workflow type identifier.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        NonEmptyString::new(value).map(Self)
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for WorkflowTypeId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Stable identifier of one running workflow instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowId(NonEmptyString);

impl WorkflowId {
    /// Creates a validated workflow instance identifier.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        NonEmptyString::new(value).map(Self)
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for WorkflowId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Workflow type lock configuration as loaded from workflow-type records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowTypeDescriptorInput {
    /// Workflow type identifier.
    pub workflow_type_id: String,
    /// Whether at most one instance of the type may run system-wide.
    #[serde(default)]
    pub is_singleton: bool,
    /// Lock acquisition timeout in milliseconds. Non-positive means unset.
    #[serde(default)]
    pub lock_timeout_ms: i64,
    /// Lock hold duration in milliseconds. Non-positive means unset.
    #[serde(default)]
    pub lock_expiration_ms: i64,
}

/// Read-only view of one workflow type used to derive type-level locks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WorkflowTypeDescriptorInput")]
pub struct WorkflowTypeDescriptor {
    workflow_type_id: WorkflowTypeId,
    is_singleton: bool,
    lock_timeout_ms: i64,
    lock_expiration_ms: i64,
}

impl WorkflowTypeDescriptor {
    /// Creates a validated workflow type descriptor.
    pub fn new(input: WorkflowTypeDescriptorInput) -> AppResult<Self> {
        let WorkflowTypeDescriptorInput {
            workflow_type_id,
            is_singleton,
            lock_timeout_ms,
            lock_expiration_ms,
        } = input;

        Ok(Self {
            workflow_type_id: WorkflowTypeId::new(workflow_type_id)?,
            is_singleton,
            lock_timeout_ms,
            lock_expiration_ms,
        })
    }

    /// Returns workflow type identifier.
    #[must_use]
    pub fn workflow_type_id(&self) -> &WorkflowTypeId {
        &self.workflow_type_id
    }

    /// Returns whether the workflow type is a singleton.
    #[must_use]
    pub fn is_singleton(&self) -> bool {
        self.is_singleton
    }

    /// Returns the configured lock timeout in milliseconds, as stored.
    #[must_use]
    pub fn lock_timeout_ms(&self) -> i64 {
        self.lock_timeout_ms
    }

    /// Returns the configured lock expiration in milliseconds, as stored.
    #[must_use]
    pub fn lock_expiration_ms(&self) -> i64 {
        self.lock_expiration_ms
    }

    /// Returns whether executing this type for the given event needs a lock.
    #[must_use]
    pub fn requires_lock(&self, is_exclusive_event: bool) -> bool {
        self.is_singleton || is_exclusive_event
    }
}

impl TryFrom<WorkflowTypeDescriptorInput> for WorkflowTypeDescriptor {
    type Error = flowlatch_core::AppError;

    fn try_from(input: WorkflowTypeDescriptorInput) -> AppResult<Self> {
        Self::new(input)
    }
}

/// Workflow instance lock configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowInstanceDescriptorInput {
    /// Workflow instance identifier.
    pub workflow_id: String,
    /// Lock acquisition timeout in milliseconds. Non-positive means unset.
    #[serde(default)]
    pub lock_timeout_ms: i64,
    /// Lock hold duration in milliseconds. Non-positive means unset.
    #[serde(default)]
    pub lock_expiration_ms: i64,
}

/// Read-only view of one running workflow instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WorkflowInstanceDescriptorInput")]
pub struct WorkflowInstanceDescriptor {
    workflow_id: WorkflowId,
    lock_timeout_ms: i64,
    lock_expiration_ms: i64,
}

impl WorkflowInstanceDescriptor {
    /// Creates a validated workflow instance descriptor.
    pub fn new(input: WorkflowInstanceDescriptorInput) -> AppResult<Self> {
        let WorkflowInstanceDescriptorInput {
            workflow_id,
            lock_timeout_ms,
            lock_expiration_ms,
        } = input;

        Ok(Self {
            workflow_id: WorkflowId::new(workflow_id)?,
            lock_timeout_ms,
            lock_expiration_ms,
        })
    }

    /// Returns workflow instance identifier.
    #[must_use]
    pub fn workflow_id(&self) -> &WorkflowId {
        &self.workflow_id
    }

    /// Returns the configured lock timeout in milliseconds, as stored.
    #[must_use]
    pub fn lock_timeout_ms(&self) -> i64 {
        self.lock_timeout_ms
    }

    /// Returns the configured lock expiration in milliseconds, as stored.
    #[must_use]
    pub fn lock_expiration_ms(&self) -> i64 {
        self.lock_expiration_ms
    }
}

impl TryFrom<WorkflowInstanceDescriptorInput> for WorkflowInstanceDescriptor {
    type Error = flowlatch_core::AppError;

    fn try_from(input: WorkflowInstanceDescriptorInput) -> AppResult<Self> {
        Self::new(input)
    }
}

//! Domain entities and invariants.

#![forbid(unsafe_code)]

mod lock_policy;
mod workflow;

pub use lock_policy::{
    DEFAULT_LOCK_DURATION, LOCK_KEY_SUFFIX, LockRequest, LockSubject, WORKFLOW_INSTANCE_LOCK_PREFIX,
    WORKFLOW_TYPE_LOCK_PREFIX, resolve_instance_lock, resolve_type_lock,
};
pub use workflow::{
    WorkflowId, WorkflowInstanceDescriptor, WorkflowInstanceDescriptorInput,
    WorkflowTypeDescriptor, WorkflowTypeDescriptorInput, WorkflowTypeId,
};

//! Application services and ports.

#![forbid(unsafe_code)]

mod lock_ports;
mod workflow_lock_service;

pub use lock_ports::{DistributedLock, LockLease};
pub use workflow_lock_service::{LockOutcome, WorkflowLock, WorkflowLockService};

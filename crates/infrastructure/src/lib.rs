//! Infrastructure adapters for application ports.

#![forbid(unsafe_code)]

mod in_memory_distributed_lock;
mod redis_distributed_lock;

pub use in_memory_distributed_lock::InMemoryDistributedLock;
pub use redis_distributed_lock::{
    DEFAULT_LOCK_RETRY_INTERVAL, MAX_LOCK_HOLD_MILLIS, RedisDistributedLock,
};

//! Flowlatch workflow worker runtime.

#![forbid(unsafe_code)]

use std::env;
use std::sync::Arc;
use std::time::Duration;

use flowlatch_application::{DistributedLock, LockOutcome, WorkflowLock, WorkflowLockService};
use flowlatch_core::{AppError, AppResult};
use flowlatch_domain::{WorkflowTypeDescriptor, WorkflowTypeDescriptorInput, resolve_type_lock};
use flowlatch_infrastructure::{InMemoryDistributedLock, RedisDistributedLock};

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockBackend {
    Memory,
    Redis,
}

#[derive(Debug, Clone)]
struct WorkerConfig {
    lock_backend: LockBackend,
    redis_url: Option<String>,
    lock_key_prefix: String,
    lock_retry_interval_ms: u64,
    worker_id: String,
    workflow_type: WorkflowTypeDescriptor,
    exclusive_event: bool,
    work_ms: u64,
    poll_interval_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = WorkerConfig::load()?;
    let lock = build_lock(&config)?;
    let service = WorkflowLockService::new(lock, config.worker_id.as_str())?;

    info!(
        worker_id = %config.worker_id,
        lock_backend = ?config.lock_backend,
        workflow_type_id = %config.workflow_type.workflow_type_id(),
        is_singleton = config.workflow_type.is_singleton(),
        exclusive_event = config.exclusive_event,
        poll_interval_ms = config.poll_interval_ms,
        "flowlatch-worker started"
    );

    let mut executed_ticks = 0_u64;
    let mut denied_ticks = 0_u64;

    loop {
        match service
            .try_acquire_workflow_type_lock(&config.workflow_type, config.exclusive_event)
            .await
        {
            LockOutcome::Skipped => {
                executed_ticks = executed_ticks.saturating_add(1);
                info!(
                    worker_id = %config.worker_id,
                    executed_ticks,
                    "workflow type lock not required; running without coordination"
                );
                tokio::time::sleep(Duration::from_millis(config.work_ms)).await;
            }
            LockOutcome::Acquired(lock) => {
                executed_ticks = executed_ticks.saturating_add(1);
                info!(
                    worker_id = %config.worker_id,
                    key = %lock.key(),
                    executed_ticks,
                    "workflow type lock acquired"
                );
                hold_protected_section(&lock, &config).await;

                if let Err(error) = lock.release().await {
                    warn!(
                        worker_id = %config.worker_id,
                        error = %error,
                        "failed to release workflow type lock"
                    );
                }
            }
            LockOutcome::Denied => {
                denied_ticks = denied_ticks.saturating_add(1);
                info!(
                    worker_id = %config.worker_id,
                    denied_ticks,
                    "workflow type lock held elsewhere; skipping tick"
                );
            }
        }

        tokio::time::sleep(Duration::from_millis(config.poll_interval_ms)).await;
    }
}

async fn hold_protected_section(lock: &WorkflowLock, config: &WorkerConfig) {
    let hold_duration = lock.lease().hold_duration;
    let renew_every = (hold_duration / 2).max(Duration::from_millis(1));
    let mut remaining = Duration::from_millis(config.work_ms);

    while !remaining.is_zero() {
        let step = remaining.min(renew_every);
        tokio::time::sleep(step).await;
        remaining = remaining.saturating_sub(step);

        if remaining.is_zero() {
            break;
        }

        match lock.renew(hold_duration).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(
                    worker_id = %config.worker_id,
                    key = %lock.key(),
                    "workflow type lock lease lost before work completed"
                );
                break;
            }
            Err(error) => {
                warn!(
                    worker_id = %config.worker_id,
                    key = %lock.key(),
                    error = %error,
                    "failed to renew workflow type lock"
                );
                break;
            }
        }
    }
}

fn build_lock(config: &WorkerConfig) -> AppResult<Arc<dyn DistributedLock>> {
    match config.lock_backend {
        LockBackend::Memory => Ok(Arc::new(InMemoryDistributedLock::new())),
        LockBackend::Redis => {
            let redis_url = config.redis_url.as_deref().ok_or_else(|| {
                AppError::Validation("REDIS_URL is required when LOCK_BACKEND=redis".to_owned())
            })?;
            let client = redis::Client::open(redis_url).map_err(|error| {
                AppError::Validation(format!("invalid REDIS_URL '{redis_url}': {error}"))
            })?;

            Ok(Arc::new(
                RedisDistributedLock::new(client, config.lock_key_prefix.as_str())
                    .with_retry_interval(Duration::from_millis(config.lock_retry_interval_ms)),
            ))
        }
    }
}

impl LockBackend {
    fn parse(value: &str) -> AppResult<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            other => Err(AppError::Validation(format!(
                "unknown LOCK_BACKEND '{other}', expected 'memory' or 'redis'"
            ))),
        }
    }
}

impl WorkerConfig {
    fn load() -> AppResult<Self> {
        let lock_backend = LockBackend::parse(
            env::var("LOCK_BACKEND")
                .unwrap_or_else(|_| "memory".to_owned())
                .as_str(),
        )?;
        let redis_url = env::var("REDIS_URL")
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty());
        let lock_key_prefix =
            env::var("LOCK_KEY_PREFIX").unwrap_or_else(|_| "flowlatch:lock".to_owned());
        let lock_retry_interval_ms = parse_env_u64("LOCK_RETRY_INTERVAL_MS", 100)?;
        let worker_id = env::var("WORKER_ID")
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| format!("worker-{}", std::process::id()));
        let workflow_type = WorkflowTypeDescriptor::new(WorkflowTypeDescriptorInput {
            workflow_type_id: required_env("WORKFLOW_TYPE_ID")?,
            is_singleton: parse_env_bool("WORKFLOW_TYPE_SINGLETON", true)?,
            lock_timeout_ms: parse_env_i64("WORKFLOW_LOCK_TIMEOUT_MS", 0)?,
            lock_expiration_ms: parse_env_i64("WORKFLOW_LOCK_EXPIRATION_MS", 0)?,
        })?;
        let exclusive_event = parse_env_bool("WORKFLOW_EXCLUSIVE_EVENT", false)?;
        let work_ms = parse_env_u64("WORKER_WORK_MS", 500)?;
        let poll_interval_ms = parse_env_u64("WORKER_POLL_INTERVAL_MS", 1500)?;

        if lock_backend == LockBackend::Redis && redis_url.is_none() {
            return Err(AppError::Validation(
                "REDIS_URL is required when LOCK_BACKEND=redis".to_owned(),
            ));
        }

        if lock_retry_interval_ms == 0 {
            return Err(AppError::Validation(
                "LOCK_RETRY_INTERVAL_MS must be greater than zero".to_owned(),
            ));
        }

        if poll_interval_ms == 0 {
            return Err(AppError::Validation(
                "WORKER_POLL_INTERVAL_MS must be greater than zero".to_owned(),
            ));
        }

        if let Some(request) = resolve_type_lock(&workflow_type, exclusive_event) {
            let acquire_timeout_ms =
                u64::try_from(request.acquire_timeout().as_millis()).unwrap_or(u64::MAX);
            let hold_ms = u64::try_from(request.hold_duration().as_millis()).unwrap_or(u64::MAX);
            info!(
                key = %request.key(),
                acquire_timeout_ms,
                hold_ms,
                "resolved workflow type lock policy"
            );
        }

        Ok(Self {
            lock_backend,
            redis_url,
            lock_key_prefix,
            lock_retry_interval_ms,
            worker_id,
            workflow_type,
            exclusive_event,
            work_ms,
            poll_interval_ms,
        })
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn required_env(name: &str) -> AppResult<String> {
    env::var(name).map_err(|_| AppError::Validation(format!("{name} is required")))
}

fn parse_env_bool(name: &str, default: bool) -> AppResult<bool> {
    match env::var(name) {
        Ok(value) => parse_bool(value.as_str()).ok_or_else(|| {
            AppError::Validation(format!("invalid {name} value '{value}': expected a boolean"))
        }),
        Err(_) => Ok(default),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_env_i64(name: &str, default: i64) -> AppResult<i64> {
    match env::var(name) {
        Ok(value) => value.trim().parse::<i64>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}

fn parse_env_u64(name: &str, default: u64) -> AppResult<u64> {
    match env::var(name) {
        Ok(value) => value.trim().parse::<u64>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}

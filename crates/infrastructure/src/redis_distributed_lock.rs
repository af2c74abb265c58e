//! Redis-backed distributed lock for workflow coordination across a fleet.

use std::time::Duration;

use async_trait::async_trait;
use flowlatch_application::{DistributedLock, LockLease};
use flowlatch_core::{AppError, AppResult};
use flowlatch_domain::LockRequest;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};
use tokio::time::Instant;

const RELEASE_LOCK_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
else
  return 0
end
"#;

const RENEW_LOCK_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('PEXPIRE', KEYS[1], ARGV[2])
else
  return 0
end
"#;

/// Longest hold Redis accepts for `PX`/`PEXPIRE` without overflowing its
/// absolute expiry (`i64::MAX / 1000` milliseconds); longer holds are capped.
pub const MAX_LOCK_HOLD_MILLIS: u64 = 9_223_372_036_854_775;

/// Default delay between acquisition attempts on a contended key.
pub const DEFAULT_LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Redis implementation of the distributed lock port.
#[derive(Clone)]
pub struct RedisDistributedLock {
    client: redis::Client,
    key_prefix: String,
    retry_interval: Duration,
}

impl RedisDistributedLock {
    /// Creates one lock adapter.
    #[must_use]
    pub fn new(client: redis::Client, key_prefix: impl Into<String>) -> Self {
        Self {
            client,
            key_prefix: key_prefix.into(),
            retry_interval: DEFAULT_LOCK_RETRY_INTERVAL,
        }
    }

    /// Overrides the delay between acquisition attempts.
    #[must_use]
    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        if !retry_interval.is_zero() {
            self.retry_interval = retry_interval;
        }

        self
    }

    fn key_for(&self, key: &str) -> String {
        format!("{}:{key}", self.key_prefix)
    }

    async fn connection(&self) -> AppResult<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|error| AppError::Internal(format!("failed to connect to redis: {error}")))
    }
}

fn hold_millis(hold_duration: Duration) -> AppResult<u64> {
    let milliseconds = u64::try_from(hold_duration.as_millis()).unwrap_or(u64::MAX);
    if milliseconds == 0 {
        return Err(AppError::Validation(
            "workflow lock hold duration must be at least one millisecond".to_owned(),
        ));
    }

    Ok(milliseconds.min(MAX_LOCK_HOLD_MILLIS))
}

#[async_trait]
impl DistributedLock for RedisDistributedLock {
    async fn try_acquire_lock(
        &self,
        request: &LockRequest,
        holder_id: &str,
    ) -> AppResult<Option<LockLease>> {
        if holder_id.trim().is_empty() {
            return Err(AppError::Validation(
                "workflow lock holder_id must not be empty".to_owned(),
            ));
        }

        let hold_ms = hold_millis(request.hold_duration())?;
        let key = self.key_for(request.key());
        let token = format!("{holder_id}:{}", uuid::Uuid::new_v4());
        let start = Instant::now();
        let deadline = start
            .checked_add(request.acquire_timeout())
            .unwrap_or(start);

        let mut connection = self.connection().await?;

        loop {
            let acquired: Option<String> = redis::cmd("SET")
                .arg(key.as_str())
                .arg(token.as_str())
                .arg("NX")
                .arg("PX")
                .arg(hold_ms)
                .query_async(&mut connection)
                .await
                .map_err(|error| {
                    AppError::Internal(format!("failed to acquire workflow lock: {error}"))
                })?;

            if acquired.is_some() {
                return Ok(Some(LockLease {
                    key: request.key().to_owned(),
                    token,
                    holder_id: holder_id.to_owned(),
                    hold_duration: request.hold_duration(),
                }));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }

            tokio::time::sleep(self.retry_interval.min(deadline - now)).await;
        }
    }

    async fn release_lock(&self, lease: &LockLease) -> AppResult<()> {
        let key = self.key_for(lease.key.as_str());
        let script = Script::new(RELEASE_LOCK_SCRIPT);
        let mut connection = self.connection().await?;

        script
            .key(key)
            .arg(lease.token.as_str())
            .invoke_async::<i32>(&mut connection)
            .await
            .map_err(|error| {
                AppError::Internal(format!("failed to release workflow lock: {error}"))
            })?;

        Ok(())
    }

    async fn renew_lock(&self, lease: &LockLease, hold_duration: Duration) -> AppResult<bool> {
        let hold_ms = hold_millis(hold_duration)?;
        let key = self.key_for(lease.key.as_str());
        let script = Script::new(RENEW_LOCK_SCRIPT);
        let mut connection = self.connection().await?;

        let renewed = script
            .key(key)
            .arg(lease.token.as_str())
            .arg(hold_ms)
            .invoke_async::<i32>(&mut connection)
            .await
            .map_err(|error| {
                AppError::Internal(format!("failed to renew workflow lock: {error}"))
            })?;

        Ok(renewed > 0)
    }

    async fn is_lock_acquired(&self, key: &str) -> AppResult<bool> {
        let key = self.key_for(key);
        let mut connection = self.connection().await?;

        connection
            .exists::<_, bool>(key.as_str())
            .await
            .map_err(|error| {
                AppError::Internal(format!("failed to probe workflow lock: {error}"))
            })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use flowlatch_application::DistributedLock;
    use flowlatch_domain::LockRequest;

    use super::{MAX_LOCK_HOLD_MILLIS, RedisDistributedLock, hold_millis};

    fn test_lock() -> Option<RedisDistributedLock> {
        let Ok(redis_url) = std::env::var("REDIS_URL") else {
            return None;
        };

        let client = match redis::Client::open(redis_url.as_str()) {
            Ok(client) => client,
            Err(error) => panic!("failed to open REDIS_URL in test: {error}"),
        };

        Some(
            RedisDistributedLock::new(
                client,
                format!("flowlatch-test:{}", uuid::Uuid::new_v4()),
            )
            .with_retry_interval(Duration::from_millis(20)),
        )
    }

    fn request(key: &str, acquire_timeout_ms: u64, hold_ms: u64) -> LockRequest {
        LockRequest::new(
            key,
            Duration::from_millis(acquire_timeout_ms),
            Duration::from_millis(hold_ms),
        )
        .unwrap_or_else(|_| unreachable!())
    }

    #[test]
    fn hold_millis_rejects_sub_millisecond_hold() {
        assert!(hold_millis(Duration::from_micros(500)).is_err());
        assert_eq!(hold_millis(Duration::from_secs(20)).ok(), Some(20_000));
    }

    #[test]
    fn hold_millis_caps_hold_at_redis_expiry_limit() {
        let exact = Duration::from_millis(MAX_LOCK_HOLD_MILLIS);
        assert_eq!(hold_millis(exact).ok(), Some(MAX_LOCK_HOLD_MILLIS));

        let near_i64_max = Duration::from_millis(9_223_372_036_854_775_807);
        assert_eq!(hold_millis(near_i64_max).ok(), Some(MAX_LOCK_HOLD_MILLIS));
        assert_eq!(hold_millis(Duration::MAX).ok(), Some(MAX_LOCK_HOLD_MILLIS));
    }

    #[tokio::test]
    async fn redis_accepts_capped_hold_duration() {
        let Some(lock) = test_lock() else {
            return;
        };

        let lease = lock
            .try_acquire_lock(&request("WFI_wf-3_LOCK", 0, u64::MAX), "worker-a")
            .await;
        let Some(lease) = lease.unwrap_or_default() else {
            panic!("expected capped hold to be accepted by redis");
        };

        assert_eq!(
            lock.renew_lock(&lease, Duration::MAX).await.ok(),
            Some(true)
        );
        assert!(lock.release_lock(&lease).await.is_ok());
    }

    #[tokio::test]
    async fn redis_lock_excludes_second_holder_until_release() {
        let Some(lock) = test_lock() else {
            return;
        };

        let first = lock
            .try_acquire_lock(&request("WFT_T1_LOCK", 0, 5_000), "worker-a")
            .await;
        assert!(first.is_ok());
        let Some(first) = first.unwrap_or_default() else {
            panic!("expected first holder to acquire redis lock");
        };

        let second = lock
            .try_acquire_lock(&request("WFT_T1_LOCK", 100, 5_000), "worker-b")
            .await;
        assert!(matches!(second, Ok(None)));
        assert_eq!(lock.is_lock_acquired("WFT_T1_LOCK").await.ok(), Some(true));

        assert!(lock.release_lock(&first).await.is_ok());
        assert!(lock.release_lock(&first).await.is_ok());

        let third = lock
            .try_acquire_lock(&request("WFT_T1_LOCK", 100, 5_000), "worker-b")
            .await;
        assert!(matches!(third, Ok(Some(_))));
    }

    #[tokio::test]
    async fn redis_lease_expires_without_release() {
        let Some(lock) = test_lock() else {
            return;
        };

        let first = lock
            .try_acquire_lock(&request("WFI_wf-1_LOCK", 0, 200), "worker-a")
            .await;
        assert!(matches!(first, Ok(Some(_))));

        let second = lock
            .try_acquire_lock(&request("WFI_wf-1_LOCK", 2_000, 5_000), "worker-b")
            .await;
        assert_eq!(
            second.ok().flatten().map(|lease| lease.holder_id),
            Some("worker-b".to_owned())
        );
    }

    #[tokio::test]
    async fn redis_renew_fails_after_ownership_changes() {
        let Some(lock) = test_lock() else {
            return;
        };

        let first = lock
            .try_acquire_lock(&request("WFI_wf-2_LOCK", 0, 5_000), "worker-a")
            .await;
        let Some(first) = first.unwrap_or_default() else {
            panic!("expected redis lock to be acquired");
        };

        assert_eq!(
            lock.renew_lock(&first, Duration::from_secs(10)).await.ok(),
            Some(true)
        );
        assert!(lock.release_lock(&first).await.is_ok());
        assert_eq!(
            lock.renew_lock(&first, Duration::from_secs(10)).await.ok(),
            Some(false)
        );
    }
}

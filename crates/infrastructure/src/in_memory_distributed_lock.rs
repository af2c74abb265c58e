use std::collections::HashMap;
use std::pin::pin;
use std::time::Duration;

use async_trait::async_trait;
use flowlatch_application::{DistributedLock, LockLease};
use flowlatch_core::{AppError, AppResult};
use flowlatch_domain::LockRequest;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
struct HeldLease {
    token: String,
    expires_at: Instant,
}

impl HeldLease {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

// Holds past what `Instant` can represent saturate here.
const LONGEST_HOLD: Duration = Duration::from_secs(86_400 * 365 * 30);

fn lease_expiry(now: Instant, hold_duration: Duration) -> Instant {
    now.checked_add(hold_duration)
        .or_else(|| now.checked_add(LONGEST_HOLD))
        .unwrap_or(now)
}

fn prune_expired(leases: &mut HashMap<String, HeldLease>, now: Instant) {
    let before = leases.len();
    leases.retain(|_, held| held.is_live(now));

    let pruned = before - leases.len();
    if pruned > 0 {
        debug!(pruned, "dropped expired workflow lock leases");
    }
}

/// Single-process lock adapter with lease expiry.
///
/// Contenders wait for a release notification or the holder's expiry,
/// whichever comes first, bounded by their acquire timeout.
#[derive(Default)]
pub struct InMemoryDistributedLock {
    leases: Mutex<HashMap<String, HeldLease>>,
    released: Notify,
}

impl InMemoryDistributedLock {
    /// Creates an empty in-memory lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DistributedLock for InMemoryDistributedLock {
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

        let start = Instant::now();
        let deadline = start
            .checked_add(request.acquire_timeout())
            .unwrap_or(start);

        loop {
            // Registered before inspecting the table so a release in between is not missed.
            let mut released = pin!(self.released.notified());
            released.as_mut().enable();

            let held_until = {
                let mut leases = self.leases.lock().await;
                let now = Instant::now();
                prune_expired(&mut leases, now);

                match leases.get(request.key()).map(|held| held.expires_at) {
                    Some(expires_at) => expires_at,
                    None => {
                        let token = format!("{holder_id}:{}", uuid::Uuid::new_v4());
                        let expires_at = lease_expiry(now, request.hold_duration());
                        leases.insert(
                            request.key().to_owned(),
                            HeldLease {
                                token: token.clone(),
                                expires_at,
                            },
                        );

                        return Ok(Some(LockLease {
                            key: request.key().to_owned(),
                            token,
                            holder_id: holder_id.to_owned(),
                            hold_duration: request.hold_duration(),
                        }));
                    }
                }
            };

            if Instant::now() >= deadline {
                return Ok(None);
            }

            let _ = tokio::time::timeout_at(held_until.min(deadline), released).await;
        }
    }

    async fn release_lock(&self, lease: &LockLease) -> AppResult<()> {
        let mut leases = self.leases.lock().await;
        if leases
            .get(lease.key.as_str())
            .is_some_and(|held| held.token == lease.token)
        {
            leases.remove(lease.key.as_str());
            drop(leases);
            self.released.notify_waiters();
        }

        Ok(())
    }

    async fn renew_lock(&self, lease: &LockLease, hold_duration: Duration) -> AppResult<bool> {
        if hold_duration.is_zero() {
            return Err(AppError::Validation(
                "workflow lock hold duration must be greater than zero".to_owned(),
            ));
        }

        let mut leases = self.leases.lock().await;
        let now = Instant::now();
        prune_expired(&mut leases, now);

        match leases.get_mut(lease.key.as_str()) {
            Some(held) if held.token == lease.token => {
                held.expires_at = lease_expiry(now, hold_duration);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn is_lock_acquired(&self, key: &str) -> AppResult<bool> {
        let mut leases = self.leases.lock().await;
        prune_expired(&mut leases, Instant::now());

        Ok(leases.contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use flowlatch_application::{DistributedLock, LockLease};
    use flowlatch_domain::LockRequest;
    use tokio::time::Instant;

    use super::InMemoryDistributedLock;

    fn request(key: &str, acquire_timeout_ms: u64, hold_ms: u64) -> LockRequest {
        LockRequest::new(
            key,
            Duration::from_millis(acquire_timeout_ms),
            Duration::from_millis(hold_ms),
        )
        .unwrap_or_else(|_| unreachable!())
    }

    async fn acquire(
        lock: &InMemoryDistributedLock,
        request: &LockRequest,
        holder_id: &str,
    ) -> Option<LockLease> {
        let result = lock.try_acquire_lock(request, holder_id).await;
        assert!(result.is_ok());
        result.unwrap_or_default()
    }

    #[tokio::test]
    async fn acquire_rejects_blank_holder() {
        let lock = InMemoryDistributedLock::new();
        let result = lock.try_acquire_lock(&request("WFI_1_LOCK", 0, 1_000), " ").await;
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn contender_times_out_while_lock_is_held() {
        let lock = InMemoryDistributedLock::new();
        let first = acquire(&lock, &request("WFT_T1_LOCK", 0, 20_000), "worker-a").await;
        assert!(first.is_some());

        let started = Instant::now();
        let second = acquire(&lock, &request("WFT_T1_LOCK", 2_000, 20_000), "worker-b").await;

        assert!(second.is_none());
        assert!(started.elapsed() >= Duration::from_millis(2_000));
        assert!(started.elapsed() < Duration::from_millis(20_000));
    }

    #[tokio::test(start_paused = true)]
    async fn contender_acquires_after_lease_expires() {
        let lock = InMemoryDistributedLock::new();
        let first = acquire(&lock, &request("WFT_T1_LOCK", 0, 5_000), "worker-a").await;
        assert!(first.is_some());

        let started = Instant::now();
        let second = acquire(&lock, &request("WFT_T1_LOCK", 10_000, 5_000), "worker-b").await;

        assert_eq!(
            second.map(|lease| lease.holder_id),
            Some("worker-b".to_owned())
        );
        assert!(started.elapsed() >= Duration::from_millis(5_000));
    }

    #[tokio::test(start_paused = true)]
    async fn release_wakes_waiting_contender() {
        let lock = Arc::new(InMemoryDistributedLock::new());
        let Some(first) = acquire(&lock, &request("WFI_7_LOCK", 0, 60_000), "worker-a").await
        else {
            panic!("expected first contender to acquire the lock");
        };

        let waiter_lock = lock.clone();
        let waiter = tokio::spawn(async move {
            let started = Instant::now();
            let lease = waiter_lock
                .try_acquire_lock(&request("WFI_7_LOCK", 30_000, 60_000), "worker-b")
                .await;
            (lease, started.elapsed())
        });

        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert!(lock.release_lock(&first).await.is_ok());

        let joined = waiter.await;
        assert!(joined.is_ok());
        let (lease, waited) = joined.unwrap_or_else(|_| unreachable!());
        assert_eq!(
            lease.ok().flatten().map(|lease| lease.holder_id),
            Some("worker-b".to_owned())
        );
        assert!(waited < Duration::from_millis(30_000));
    }

    #[tokio::test(start_paused = true)]
    async fn exactly_one_of_simultaneous_contenders_acquires() {
        let lock = Arc::new(InMemoryDistributedLock::new());
        let mut contenders = Vec::new();

        for index in 0..2 {
            let contender_lock = lock.clone();
            contenders.push(tokio::spawn(async move {
                contender_lock
                    .try_acquire_lock(
                        &request("WFT_shared_LOCK", 1_000, 20_000),
                        format!("worker-{index}").as_str(),
                    )
                    .await
            }));
        }

        let mut acquired = 0;
        for contender in contenders {
            let result = contender.await;
            assert!(result.is_ok());
            if result.ok().and_then(Result::ok).flatten().is_some() {
                acquired += 1;
            }
        }

        assert_eq!(acquired, 1);
    }

    #[tokio::test]
    async fn release_is_noop_for_released_or_superseded_lease() {
        let lock = InMemoryDistributedLock::new();
        let Some(first) = acquire(&lock, &request("WFI_8_LOCK", 0, 1_000), "worker-a").await
        else {
            panic!("expected lock to be acquired");
        };

        assert!(lock.release_lock(&first).await.is_ok());
        assert!(lock.release_lock(&first).await.is_ok());

        let second = acquire(&lock, &request("WFI_8_LOCK", 0, 1_000), "worker-b").await;
        assert!(second.is_some());
        assert!(lock.release_lock(&first).await.is_ok());
        assert_eq!(lock.is_lock_acquired("WFI_8_LOCK").await.ok(), Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_lease_cannot_be_renewed_and_releases_silently() {
        let lock = InMemoryDistributedLock::new();
        let Some(lease) = acquire(&lock, &request("WFI_9_LOCK", 0, 1_000), "worker-a").await
        else {
            panic!("expected lock to be acquired");
        };

        assert_eq!(
            lock.renew_lock(&lease, Duration::from_millis(3_000)).await.ok(),
            Some(true)
        );
        tokio::time::sleep(Duration::from_millis(2_000)).await;
        assert_eq!(lock.is_lock_acquired("WFI_9_LOCK").await.ok(), Some(true));

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(lock.is_lock_acquired("WFI_9_LOCK").await.ok(), Some(false));
        assert_eq!(
            lock.renew_lock(&lease, Duration::from_millis(3_000)).await.ok(),
            Some(false)
        );
        assert!(lock.release_lock(&lease).await.is_ok());
    }

    #[tokio::test]
    async fn renew_rejects_zero_hold_duration() {
        let lock = InMemoryDistributedLock::new();
        let Some(lease) = acquire(&lock, &request("WFI_10_LOCK", 0, 1_000), "worker-a").await
        else {
            panic!("expected lock to be acquired");
        };

        assert!(lock.renew_lock(&lease, Duration::ZERO).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_leases_are_dropped_once_expired() {
        let lock = InMemoryDistributedLock::new();
        for index in 0..1_000 {
            let key = format!("WFI_{index}_LOCK");
            assert!(acquire(&lock, &request(&key, 0, 10), "worker-a").await.is_some());
        }
        assert_eq!(lock.leases.lock().await.len(), 1_000);

        tokio::time::sleep(Duration::from_millis(60_000)).await;
        assert_eq!(lock.is_lock_acquired("WFI_0_LOCK").await.ok(), Some(false));
        assert!(lock.leases.lock().await.is_empty());

        for index in 0..1_000 {
            let key = format!("WFI_{index}_LOCK");
            assert!(acquire(&lock, &request(&key, 0, 10), "worker-a").await.is_some());
        }
        tokio::time::sleep(Duration::from_millis(60_000)).await;
        assert!(acquire(&lock, &request("WFI_new_LOCK", 0, 1_000), "worker-b").await.is_some());
        assert_eq!(lock.leases.lock().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unrepresentable_hold_keeps_lease_live() {
        let lock = InMemoryDistributedLock::new();
        let lease = acquire(&lock, &request("WFI_11_LOCK", 0, u64::MAX), "worker-a").await;
        assert!(lease.is_some());

        tokio::time::sleep(Duration::from_millis(60_000)).await;
        assert_eq!(lock.is_lock_acquired("WFI_11_LOCK").await.ok(), Some(true));
    }
}

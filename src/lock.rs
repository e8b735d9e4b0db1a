//! Distributed mutual exclusion on top of the liveness store
//!
//! A lock is a store key `lock:<resource>` whose value is a token unique
//! to the holder. Acquisition is a conditional set (only-if-absent) with
//! a TTL that bounds the critical section; release deletes the key only
//! if it still carries the holder's token, so a release that arrives
//! after the TTL freed the lock can never clobber a new holder.
//!
//! Failing to get the lock is a normal outcome, not an error: callers
//! match on [`AcquireOutcome`]. Only store infrastructure failures
//! surface as `Err`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, instrument, trace, warn};
use uuid::Uuid;

use crate::store::{LivenessStore, StoreResult};

/// How often a waiting acquirer re-attempts the conditional set
const POLL_INTERVAL: Duration = Duration::from_millis(50);

fn lock_key(resource: &str) -> String {
    format!("lock:{resource}")
}

/// Outcome of a lock acquisition attempt
///
/// `TimedOut` carries no handle on purpose: the guard is the only
/// capability to release, so a loser cannot release someone else's lock.
#[derive(Debug)]
pub enum AcquireOutcome {
    Acquired(LockGuard),
    TimedOut,
}

/// Acquires and releases named locks against a shared store
#[derive(Clone)]
pub struct LockService {
    store: Arc<dyn LivenessStore>,
}

impl LockService {
    pub fn new(store: Arc<dyn LivenessStore>) -> Self {
        Self { store }
    }

    /// Try to acquire `resource`, waiting up to `max_wait` for the
    /// current holder to release or expire.
    ///
    /// `ttl` bounds the critical section: if the holder dies, the store
    /// frees the lock after `ttl` on its own.
    #[instrument(skip(self), fields(resource = %resource))]
    pub async fn acquire(
        &self,
        resource: &str,
        ttl: Duration,
        max_wait: Duration,
    ) -> StoreResult<AcquireOutcome> {
        let key = lock_key(resource);
        let token = Uuid::new_v4().to_string();
        let deadline = Instant::now() + max_wait;

        loop {
            let acquired = self.store.set_with_expiry(&key, &token, ttl, true).await?;

            if acquired {
                trace!("acquired {key}");
                return Ok(AcquireOutcome::Acquired(LockGuard {
                    store: Arc::clone(&self.store),
                    key,
                    token,
                }));
            }

            if Instant::now() >= deadline {
                debug!("gave up waiting for {key} after {max_wait:?}");
                return Ok(AcquireOutcome::TimedOut);
            }

            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Single non-blocking acquisition attempt
    pub async fn try_acquire(&self, resource: &str, ttl: Duration) -> StoreResult<AcquireOutcome> {
        self.acquire(resource, ttl, Duration::ZERO).await
    }
}

/// Proof of lock ownership
///
/// There is no `Drop` impl releasing the lock (an async store call cannot
/// run there); a guard that is never released costs at most one TTL.
pub struct LockGuard {
    store: Arc<dyn LivenessStore>,
    key: String,
    token: String,
}

impl LockGuard {
    /// Release the lock if we still hold it.
    ///
    /// Best effort by design: an expired or taken-over lock makes this a
    /// no-op, and store failures are logged and swallowed because the
    /// TTL will free the lock regardless.
    pub async fn release(self) {
        match self
            .store
            .delete_if_value_equals(&self.key, &self.token)
            .await
        {
            Ok(true) => trace!("released {}", self.key),
            Ok(false) => debug!("{} expired or changed hands before release", self.key),
            Err(e) => warn!("failed to release {}: {e}", self.key),
        }
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

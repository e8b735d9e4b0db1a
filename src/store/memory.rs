//! In-memory liveness store (single process)
//!
//! Keys live in a map with absolute deadlines. A background sweeper task
//! collects entries past their deadline and publishes the expired keys on
//! a broadcast feed; reads additionally treat past-deadline entries as
//! absent so correctness never depends on sweeper timing.
//!
//! ## Limitations
//!
//! - **Single node**: No cross-process visibility. Clustered deployments
//!   need a shared backend behind the same trait.
//! - **No persistence**: All keys are lost on restart. That is acceptable
//!   here: heartbeats regenerate within one liveness window and locks are
//!   short-lived by construction.
//!
//! An entry that is overwritten or explicitly deleted before the sweeper
//! visits it never reaches the expiry feed.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{RwLock, broadcast};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use super::LivenessStore;
use super::error::StoreResult;

/// How often the sweeper scans for expired entries
const SWEEP_INTERVAL: Duration = Duration::from_millis(100);

/// Capacity of the expiry broadcast feed
const EXPIRY_FEED_CAPACITY: usize = 256;

/// A stored value with its expiry deadline
#[derive(Debug, Clone)]
struct Entry {
    value: String,
    deadline: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.deadline > now
    }
}

/// In-memory TTL store with an expiry event feed
///
/// Construction spawns the sweeper task, so a Tokio runtime must be
/// running. The sweeper stops on its own once the store is dropped.
pub struct MemoryStore {
    /// Live entries keyed by full store key
    entries: Arc<RwLock<HashMap<String, Entry>>>,

    /// Raw expiry feed (unfiltered); subscribers get a filtered view
    expired_tx: broadcast::Sender<String>,
}

impl MemoryStore {
    /// Create a new store and start its sweeper
    pub fn new() -> Self {
        let entries = Arc::new(RwLock::new(HashMap::new()));
        let (expired_tx, _) = broadcast::channel(EXPIRY_FEED_CAPACITY);

        spawn_sweeper(Arc::downgrade(&entries), expired_tx.clone());

        Self {
            entries,
            expired_tx,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LivenessStore for MemoryStore {
    async fn set_with_expiry(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
        only_if_absent: bool,
    ) -> StoreResult<bool> {
        let mut entries = self.entries.write().await;
        let now = Instant::now();

        if only_if_absent
            && let Some(existing) = entries.get(key)
            && existing.is_live(now)
        {
            trace!("conditional set on {key} skipped, live entry present");
            return Ok(false);
        }

        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                deadline: now + ttl,
            },
        );

        trace!("set {key} with ttl {ttl:?}");
        Ok(true)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let entries = self.entries.read().await;
        let now = Instant::now();

        Ok(entries.get(key).is_some_and(|entry| entry.is_live(now)))
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut entries = self.entries.write().await;
        let now = Instant::now();

        // Removing here (rather than leaving it for the sweeper) is what
        // suppresses the expiry event for a cancelled key.
        match entries.remove(key) {
            Some(entry) => {
                trace!("deleted {key}");
                Ok(entry.is_live(now))
            }
            None => Ok(false),
        }
    }

    async fn delete_if_value_equals(&self, key: &str, expected: &str) -> StoreResult<bool> {
        let mut entries = self.entries.write().await;
        let now = Instant::now();

        let matches = entries
            .get(key)
            .is_some_and(|entry| entry.is_live(now) && entry.value == expected);

        if matches {
            entries.remove(key);
            trace!("conditionally deleted {key}");
        }

        Ok(matches)
    }

    fn subscribe_expiry(&self, prefix: &str) -> broadcast::Receiver<String> {
        let (tx, rx) = broadcast::channel(EXPIRY_FEED_CAPACITY);
        let mut feed = self.expired_tx.subscribe();
        let prefix = prefix.to_string();

        // Filter the raw feed down to the requested prefix
        tokio::spawn(async move {
            loop {
                match feed.recv().await {
                    Ok(key) => {
                        if !key.starts_with(&prefix) {
                            continue;
                        }
                        if tx.send(key).is_err() {
                            // Subscriber dropped their receiver
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("expiry subscriber lagged, skipped {skipped} events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        rx
    }
}

/// Start the background task that collects expired entries and publishes
/// them on the feed. Holds only a weak reference so dropping the store
/// stops the task.
fn spawn_sweeper(entries: Weak<RwLock<HashMap<String, Entry>>>, expired_tx: broadcast::Sender<String>) {
    tokio::spawn(async move {
        debug!("liveness sweeper started");
        let mut tick = tokio::time::interval(SWEEP_INTERVAL);

        loop {
            tick.tick().await;

            let Some(entries) = entries.upgrade() else {
                break;
            };

            let now = Instant::now();
            let mut expired = Vec::new();
            {
                let mut entries = entries.write().await;
                entries.retain(|key, entry| {
                    if entry.is_live(now) {
                        true
                    } else {
                        expired.push(key.clone());
                        false
                    }
                });
            }

            for key in expired {
                trace!("expired: {key}");
                // Send only fails when nobody subscribed, which is fine
                let _ = expired_tx.send(key);
            }
        }

        debug!("liveness sweeper stopped");
    });
}

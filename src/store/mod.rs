//! Shared liveness store
//!
//! This module provides the trait-based abstraction over the volatile
//! key/TTL store that heartbeats and locks live in.
//!
//! ## Design
//!
//! - **Trait-based**: `LivenessStore` allows swapping implementations
//!   (in-memory for tests and single-node deployments, Redis-shaped
//!   backends for clustered ones)
//! - **Async**: All operations are async for compatibility with Tokio actors
//! - **Expiry-driven**: TTL expiry is an event source, not just garbage
//!   collection; consumers subscribe to a key-prefix feed
//!
//! ## Semantics that callers rely on
//!
//! - Key existence is the liveness signal. Reads must treat entries past
//!   their deadline as absent even before the sweeper collects them.
//! - Explicit `delete` never produces an expiry event. Cancelling a
//!   heartbeat this way is what suppresses a pending offline transition.
//! - `delete_if_value_equals` is atomic: compare and delete happen as one
//!   store operation, never as a read followed by a delete.
//! - The expiry feed is at-least-once. Consumers deduplicate behind the
//!   lock service and must tolerate lagged/dropped deliveries.

pub mod error;
pub mod memory;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

/// Trait for the volatile key/TTL store backing heartbeats and locks
///
/// Implementations must be `Send + Sync` as they are shared across
/// async tasks (typically behind an `Arc`).
#[async_trait]
pub trait LivenessStore: Send + Sync {
    /// Set `key` to `value` with a time-to-live.
    ///
    /// With `only_if_absent` the write only happens when no live entry
    /// exists for the key (the conditional set locks are built on) and
    /// the return value says whether it did. Unconditional sets always
    /// return `true` and reset the TTL.
    async fn set_with_expiry(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
        only_if_absent: bool,
    ) -> StoreResult<bool>;

    /// Does a live (non-expired) entry exist for `key`?
    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Remove `key` unconditionally. Returns whether a live entry was
    /// removed. Never emits an expiry event.
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Remove `key` only if its current value equals `expected`, as one
    /// atomic operation. Returns whether the delete happened.
    async fn delete_if_value_equals(&self, key: &str, expected: &str) -> StoreResult<bool>;

    /// Subscribe to TTL-expiry events for keys starting with `prefix`.
    ///
    /// The receiver yields the full expired key. Delivery is
    /// at-least-once; a slow receiver can lag and lose the oldest events.
    fn subscribe_expiry(&self, prefix: &str) -> broadcast::Receiver<String>;
}

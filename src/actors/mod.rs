//! Actor-based monitoring architecture
//!
//! This module implements the actor at the core of the monitoring
//! system: machine liveness tracking, offline detection, and alert
//! evaluation all live on one task that owns the mutable state.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌───────────────┐    commands     ┌───────────────────┐
//! │  Transports   │ ──────────────> │   MonitorActor    │
//! │ (TCP ingest,  │                 │                   │
//! │  tests)       │                 │  - liveness map   │
//! └───────────────┘                 │  - rule set       │
//!                                   └─────────┬─────────┘
//! ┌───────────────┐  expiry feed (hb:*)       │
//! │ LivenessStore │ ─────────────────────────>│
//! │               │ <── touch / delete ───────┤
//! └───────────────┘                           │
//!                        lock winner path     │
//!                   ┌────────────────────────┴────────┐
//!                   │ 1. try_acquire offline:<id>     │
//!                   │ 2. recheck heartbeat absence    │
//!                   │ 3. snapshot + mark offline      │
//!                   │ 4. evaluate rules under lock    │
//!                   │ 5. release, then dispatch       │
//!                   └────────────────┬────────────────┘
//!                                    │ spawned tasks
//!                           ┌────────▼────────┐
//!                           │   Dispatcher    │ ──> email / push / sms
//!                           └─────────────────┘
//! ```
//!
//! ## Communication Patterns
//!
//! - **Commands** (`MonitorCommand`): mpsc, fire-and-forget or with a
//!   `oneshot` response channel for queries
//! - **Events** (`MonitorEvent`): broadcast, many subscribers, lossy
//!   under lag
//! - **Expiry feed**: broadcast of expired store keys, filtered to the
//!   heartbeat prefix before it reaches the actor
//!
//! Slow work (provider HTTP calls, retries) never runs on the actor
//! loop; it is spawned so a stuck provider cannot stall liveness
//! tracking.

pub mod messages;
pub mod monitor;

pub use messages::{MachineState, MonitorCommand, MonitorEvent};
pub use monitor::{MonitorConfig, MonitorHandle, HEARTBEAT_PREFIX};

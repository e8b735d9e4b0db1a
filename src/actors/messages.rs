//! Message types for actor communication
//!
//! ## Design Principles
//!
//! 1. **Commands**: Request/response messages sent to the monitor via mpsc
//! 2. **Events**: Broadcast notifications published to multiple subscribers
//! 3. **Immutability**: All events are cloneable for multi-subscriber patterns

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::MachineSignal;

/// Commands that can be sent to the MonitorActor
#[derive(Debug)]
pub enum MonitorCommand {
    /// Record an inbound machine signal
    ///
    /// This is the single ingestion callback: every transport adapter
    /// funnels its decoded signals through here.
    Submit { signal: MachineSignal },

    /// Cancel a machine's heartbeat (decommissioning)
    ///
    /// Removes the heartbeat without emitting an expiry event, so a
    /// pending offline transition is suppressed rather than fired.
    Cancel { machine_id: String },

    /// Get the local liveness state of a machine
    GetState {
        machine_id: String,
        respond_to: oneshot::Sender<Option<MachineState>>,
    },

    /// Gracefully shut down the monitor
    ///
    /// In-flight critical sections finish; the expiry subscription is
    /// dropped with the actor.
    Shutdown,
}

/// Local liveness state of one machine, as this worker sees it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineState {
    Live,
    Offline,
}

/// Events published by the monitor for observers
///
/// The broadcast channel may lag for slow subscribers; events are
/// advisory (dashboards, audit trails) and never drive correctness.
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    /// A machine's heartbeat lapsed and this worker won the transition
    MachineOffline {
        machine_id: String,
        at: DateTime<Utc>,
    },

    /// A previously offline machine sent a signal again
    MachineBackOnline {
        machine_id: String,
        at: DateTime<Utc>,
    },

    /// A rule matched; dispatch has been handed off
    RuleTriggered {
        machine_id: String,
        rule_id: Uuid,
        rule_name: String,
        at: DateTime<Utc>,
    },
}

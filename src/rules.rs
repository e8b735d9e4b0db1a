//! Alert rule model and evaluation
//!
//! Evaluation is a pure function over a rule and a snapshot: no I/O, no
//! mutation, safe to call from any number of workers concurrently.
//!
//! ## Fail-closed matching
//!
//! A condition whose parameter is missing from the snapshot, or whose
//! value is not numeric, is simply `false`. A questionable rule must
//! never page anyone: disabled rules, rules without conditions or
//! actions, and empty snapshots all evaluate to
//! [`Verdict::NotTriggered`] without inspecting anything.
//!
//! ## Numeric equality
//!
//! Sensor values arrive as floats, so `Eq` means "within
//! [`EQUALITY_TOLERANCE`]", never exact float equality.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::OperationalSnapshot;
use crate::notify::ChannelKind;

/// Half-width of the band treated as equal by [`ComparisonOp::Eq`]
pub const EQUALITY_TOLERANCE: f64 = 1e-4;

/// Comparison operator of a single condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOp {
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
}

/// How a rule combines its conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Logic {
    #[default]
    And,
    Or,
}

/// Urgency attached to a rule's notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// A single threshold check against one snapshot parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Parameter name, matched case-insensitively against the snapshot
    pub parameter: String,

    pub op: ComparisonOp,

    pub threshold: f64,

    /// Display unit for rendered messages ("°C", "rpm", ...)
    #[serde(default)]
    pub unit: Option<String>,

    /// Operator-supplied classification hints, carried through verbatim
    #[serde(default)]
    pub downtime_reasons: Option<Vec<String>>,
}

impl Condition {
    /// Does this condition hold against the snapshot?
    ///
    /// Missing or non-numeric parameters make the condition false.
    pub fn holds(&self, snapshot: &OperationalSnapshot) -> bool {
        let Some(value) = snapshot.get(&self.parameter) else {
            return false;
        };
        let Some(current) = value.as_number() else {
            return false;
        };

        match self.op {
            ComparisonOp::Gt => current > self.threshold,
            ComparisonOp::Gte => current >= self.threshold,
            ComparisonOp::Lt => current < self.threshold,
            ComparisonOp::Lte => current <= self.threshold,
            ComparisonOp::Eq => (current - self.threshold).abs() < EQUALITY_TOLERANCE,
        }
    }
}

/// What to do when a rule triggers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertAction {
    pub channel: ChannelKind,

    pub recipients: Vec<String>,

    /// Message template; empty means the built-in default line
    #[serde(default)]
    pub template: String,
}

/// A configured alert rule
///
/// Read-only to the engine; mutable rule management lives with whatever
/// loaded the configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,

    pub customer_id: String,

    /// Scope: `None` applies the rule to every machine of the customer
    #[serde(default)]
    pub machine_id: Option<String>,

    /// Optional sensor scope, carried for bookkeeping
    #[serde(default)]
    pub sensor_id: Option<String>,

    pub name: String,

    #[serde(default)]
    pub logic: Logic,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub priority: Priority,

    /// When this rule last fired; seeds the dispatch cool-down
    #[serde(default)]
    pub last_triggered: Option<DateTime<Utc>>,

    /// Per-rule cool-down override in seconds
    #[serde(default)]
    pub cooldown_secs: Option<u64>,

    #[serde(default)]
    pub conditions: Vec<Condition>,

    #[serde(default)]
    pub actions: Vec<AlertAction>,
}

fn default_enabled() -> bool {
    true
}

impl AlertRule {
    /// Is this rule in scope for the given machine?
    pub fn applies_to(&self, machine_id: &str) -> bool {
        match &self.machine_id {
            Some(scoped) => scoped == machine_id,
            None => true,
        }
    }

    /// The first condition that currently holds, for message rendering.
    /// Falls back to the first condition when none hold (offline
    /// dispatches render against the last known snapshot, where nothing
    /// may match).
    pub fn reporting_condition(&self, snapshot: &OperationalSnapshot) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|c| c.holds(snapshot))
            .or_else(|| self.conditions.first())
    }
}

/// Result of evaluating one rule against one snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Triggered,
    NotTriggered,
}

impl Verdict {
    pub fn is_triggered(&self) -> bool {
        matches!(self, Verdict::Triggered)
    }
}

/// Evaluate a rule against a snapshot.
pub fn evaluate(rule: &AlertRule, snapshot: &OperationalSnapshot) -> Verdict {
    if !rule.enabled
        || rule.conditions.is_empty()
        || rule.actions.is_empty()
        || snapshot.is_empty()
    {
        return Verdict::NotTriggered;
    }

    let matched = match rule.logic {
        Logic::And => rule.conditions.iter().all(|c| c.holds(snapshot)),
        Logic::Or => rule.conditions.iter().any(|c| c.holds(snapshot)),
    };

    if matched {
        Verdict::Triggered
    } else {
        Verdict::NotTriggered
    }
}

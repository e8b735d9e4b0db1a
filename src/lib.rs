pub mod actors;
pub mod config;
pub mod ingest;
pub mod lock;
pub mod machines;
pub mod notify;
pub mod rules;
pub mod store;
pub mod util;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single inbound signal from a machine.
///
/// Transport adapters (event-stream consumer, queue consumer, the bundled
/// TCP listener) decode their wire format into this struct and hand it to
/// [`actors::monitor::MonitorHandle::submit`]. Liveness is refreshed for
/// every signal, even one with no readings: the heartbeat tracks transport
/// reachability, not data quality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineSignal {
    /// Machine identifier, as assigned by configuration management.
    pub machine_id: String,

    /// Raw sensor readings keyed by parameter name.
    #[serde(default)]
    pub readings: HashMap<String, serde_json::Value>,

    /// When the signal was received by the transport.
    #[serde(default = "Utc::now")]
    pub received_at: DateTime<Utc>,
}

impl MachineSignal {
    /// Convert the raw readings into an evaluation-ready snapshot.
    pub fn snapshot(&self) -> OperationalSnapshot {
        OperationalSnapshot::from_readings(&self.readings)
    }
}

/// A parameter value after ingestion-boundary conversion.
///
/// The rule engine only ever sees this enum; all "is it convertible to a
/// number" inspection happens once, here, when the snapshot is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Number(f64),
    NonNumeric(String),
}

impl ParamValue {
    /// Coerce a raw JSON value the way the ingestion path does: numerals
    /// and numeric strings become numbers, booleans map to 1/0, everything
    /// else is kept as an inert string.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Number(n) => match n.as_f64() {
                Some(f) => ParamValue::Number(f),
                None => ParamValue::NonNumeric(n.to_string()),
            },
            serde_json::Value::String(s) => match s.trim().parse::<f64>() {
                Ok(f) => ParamValue::Number(f),
                Err(_) => ParamValue::NonNumeric(s.clone()),
            },
            serde_json::Value::Bool(b) => ParamValue::Number(if *b { 1.0 } else { 0.0 }),
            other => ParamValue::NonNumeric(other.to_string()),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            ParamValue::Number(f) => Some(*f),
            ParamValue::NonNumeric(_) => None,
        }
    }
}

/// The latest known readings for one machine.
///
/// Parameter lookup is case-insensitive: keys are normalised to lowercase
/// on insert and queries are lowercased on the way in. Produced by the
/// ingestion path (or the machine-state collaborator for machines that
/// have gone quiet), consumed read-only by the rule engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationalSnapshot {
    readings: HashMap<String, ParamValue>,
}

impl OperationalSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_readings(readings: &HashMap<String, serde_json::Value>) -> Self {
        let mut snapshot = Self::new();
        for (parameter, value) in readings {
            snapshot.insert(parameter, ParamValue::from_json(value));
        }
        snapshot
    }

    pub fn insert(&mut self, parameter: &str, value: ParamValue) {
        self.readings.insert(parameter.to_lowercase(), value);
    }

    pub fn get(&self, parameter: &str) -> Option<&ParamValue> {
        self.readings.get(&parameter.to_lowercase())
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }
}

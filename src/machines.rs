//! Machine-state collaborator
//!
//! The monitor consumes machine state through [`MachineDirectory`] and
//! never owns it: marking a machine offline and fetching its last known
//! readings are the only operations the core needs. A production
//! deployment implements the trait over its machine database, whose own
//! ingestion pipeline keeps the readings current.
//!
//! [`InMemoryDirectory`] is the bundled implementation for tests and
//! single-node deployments. It additionally exposes
//! [`InMemoryDirectory::record_snapshot`] as the write-through target for
//! the bundled TCP adapter, deliberately outside the trait.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::OperationalSnapshot;

/// Business-visible machine status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineStatus {
    Online,
    Offline,
}

/// Consumed interface to wherever machine state actually lives
#[async_trait]
pub trait MachineDirectory: Send + Sync {
    /// Record that the machine is offline.
    async fn mark_offline(&self, machine_id: &str) -> anyhow::Result<()>;

    /// The latest known readings for the machine, if any were ever seen.
    async fn latest_snapshot(
        &self,
        machine_id: &str,
    ) -> anyhow::Result<Option<OperationalSnapshot>>;
}

#[derive(Debug, Clone)]
struct MachineRecord {
    status: MachineStatus,
    snapshot: Option<OperationalSnapshot>,
}

/// In-memory machine state for tests and single-node deployments
#[derive(Clone, Default)]
pub struct InMemoryDirectory {
    machines: Arc<RwLock<HashMap<String, MachineRecord>>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the latest readings for a machine. Receiving data also means
    /// the machine is talking, so its status flips back to online.
    pub async fn record_snapshot(&self, machine_id: &str, snapshot: OperationalSnapshot) {
        let mut machines = self.machines.write().await;
        machines.insert(
            machine_id.to_string(),
            MachineRecord {
                status: MachineStatus::Online,
                snapshot: Some(snapshot),
            },
        );
    }

    /// Current status, if the machine was ever seen
    pub async fn status(&self, machine_id: &str) -> Option<MachineStatus> {
        let machines = self.machines.read().await;
        machines.get(machine_id).map(|record| record.status)
    }
}

#[async_trait]
impl MachineDirectory for InMemoryDirectory {
    async fn mark_offline(&self, machine_id: &str) -> anyhow::Result<()> {
        let mut machines = self.machines.write().await;

        // Keep the last snapshot: offline rule evaluation runs against it
        machines
            .entry(machine_id.to_string())
            .and_modify(|record| record.status = MachineStatus::Offline)
            .or_insert_with(|| MachineRecord {
                status: MachineStatus::Offline,
                snapshot: None,
            });

        debug!("{machine_id} marked offline");
        Ok(())
    }

    async fn latest_snapshot(
        &self,
        machine_id: &str,
    ) -> anyhow::Result<Option<OperationalSnapshot>> {
        let machines = self.machines.read().await;
        Ok(machines
            .get(machine_id)
            .and_then(|record| record.snapshot.clone()))
    }
}

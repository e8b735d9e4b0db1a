//! Monitor actor: heartbeat tracking, offline detection, rule evaluation
//!
//! One actor owns the whole liveness picture. Signals refresh a TTL'd
//! heartbeat key; the store's expiry feed reports lapsed heartbeats; a
//! periodic reconciliation sweep catches anything the feed dropped.
//! Offline transitions run under a distributed lock so that in a
//! multi-worker deployment exactly one worker handles each lapse.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, instrument, warn};

use super::messages::{MachineState, MonitorCommand, MonitorEvent};
use crate::lock::{AcquireOutcome, LockService};
use crate::machines::MachineDirectory;
use crate::notify::{DispatchContext, Dispatcher};
use crate::rules::{AlertRule, evaluate};
use crate::store::LivenessStore;
use crate::{MachineSignal, OperationalSnapshot};

/// Store key prefix for heartbeat entries
pub const HEARTBEAT_PREFIX: &str = "hb:";

/// Buffer size for the command channel
const COMMAND_BUFFER: usize = 64;

fn heartbeat_key(machine_id: &str) -> String {
    format!("{HEARTBEAT_PREFIX}{machine_id}")
}

/// Extract the machine id from an expired heartbeat key
fn parse_heartbeat_key(key: &str) -> Option<&str> {
    key.strip_prefix(HEARTBEAT_PREFIX).filter(|id| !id.is_empty())
}

/// Lock resource name guarding one machine's offline transition
fn offline_resource(machine_id: &str) -> String {
    format!("offline:{machine_id}")
}

/// Timing knobs for the monitor
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// How long a machine stays live without a fresh signal
    pub heartbeat_ttl: Duration,

    /// TTL on the per-machine offline-transition lock
    pub lock_ttl: Duration,

    /// How often the reconciliation sweep runs
    pub reconcile_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            heartbeat_ttl: Duration::from_secs(90),
            lock_ttl: Duration::from_secs(10),
            reconcile_interval: Duration::from_secs(90),
        }
    }
}

/// What this worker knows about one machine
#[derive(Debug, Clone, Copy)]
struct TrackedMachine {
    state: MachineState,

    /// When the last signal arrived here, for the reconciliation sweep
    last_seen: Instant,
}

/// Actor that owns liveness state and drives offline detection
pub struct MonitorActor {
    /// Shared TTL store holding heartbeat and lock keys
    store: Arc<dyn LivenessStore>,

    /// Business-facing machine registry (snapshots, offline marking)
    directory: Arc<dyn MachineDirectory>,

    /// Notification fan-out, invoked from spawned tasks only
    dispatcher: Arc<Dispatcher>,

    /// Distributed locks over the same store
    locks: LockService,

    /// Alert rules, scoped per machine via `applies_to`
    rules: Vec<AlertRule>,

    /// Machine id to display name, for rendered notifications
    displays: HashMap<String, String>,

    config: MonitorConfig,

    /// Per-machine liveness as this worker last saw it
    machines: HashMap<String, TrackedMachine>,

    /// Channel for receiving commands
    command_rx: mpsc::Receiver<MonitorCommand>,

    /// Expired heartbeat keys from the store
    expiry_rx: broadcast::Receiver<String>,

    /// Channel for publishing monitor events
    event_tx: broadcast::Sender<MonitorEvent>,
}

impl MonitorActor {
    /// Main actor loop
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting monitor actor");

        let mut reconcile = tokio::time::interval(self.config.reconcile_interval);

        loop {
            tokio::select! {
                // Expired heartbeat keys from the store
                result = self.expiry_rx.recv() => {
                    match result {
                        Ok(key) => self.handle_expired_key(&key).await,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            // The reconciliation sweep picks up what we missed
                            warn!("monitor lagged, skipped {} expiry events", skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            warn!("expiry feed closed, shutting down monitor");
                            break;
                        }
                    }
                }

                // Periodic consistency check against the store
                _ = reconcile.tick() => {
                    self.reconcile().await;
                }

                // Commands from handles
                Some(command) = self.command_rx.recv() => {
                    match command {
                        MonitorCommand::Submit { signal } => {
                            self.handle_signal(signal).await;
                        }
                        MonitorCommand::Cancel { machine_id } => {
                            self.handle_cancel(&machine_id).await;
                        }
                        MonitorCommand::GetState { machine_id, respond_to } => {
                            let state = self.machines.get(&machine_id).map(|m| m.state);
                            let _ = respond_to.send(state);
                        }
                        MonitorCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }

                else => {
                    warn!("command channel closed, shutting down monitor");
                    break;
                }
            }
        }

        debug!("monitor actor stopped");
    }

    /// Handle one inbound signal: refresh liveness, then evaluate
    #[instrument(skip(self, signal), fields(machine_id = %signal.machine_id))]
    async fn handle_signal(&mut self, signal: MachineSignal) {
        let machine_id = signal.machine_id.clone();

        // Refresh the heartbeat first; even an empty payload proves life
        let marker = signal.received_at.to_rfc3339();
        if let Err(e) = self
            .store
            .set_with_expiry(
                &heartbeat_key(&machine_id),
                &marker,
                self.config.heartbeat_ttl,
                false,
            )
            .await
        {
            // The signal data is still actionable, so keep going
            error!("failed to refresh heartbeat for {machine_id}: {e}");
        }

        let previous = self.machines.insert(
            machine_id.clone(),
            TrackedMachine {
                state: MachineState::Live,
                last_seen: Instant::now(),
            },
        );
        if previous.map(|m| m.state) == Some(MachineState::Offline) {
            debug!("{machine_id} is back online");
            let _ = self.event_tx.send(MonitorEvent::MachineBackOnline {
                machine_id: machine_id.clone(),
                at: Utc::now(),
            });
        }

        let snapshot = signal.snapshot();
        if snapshot.is_empty() {
            // Liveness-only signal, nothing to evaluate
            return;
        }

        for rule in self.rules.iter().filter(|r| r.applies_to(&machine_id)) {
            if evaluate(rule, &snapshot).is_triggered() {
                debug!("rule '{}' triggered for {machine_id}", rule.name);
                let _ = self.event_tx.send(MonitorEvent::RuleTriggered {
                    machine_id: machine_id.clone(),
                    rule_id: rule.id,
                    rule_name: rule.name.clone(),
                    at: signal.received_at,
                });
                self.spawn_dispatch(rule, &machine_id, snapshot.clone(), signal.received_at);
            }
        }
    }

    /// Cancel a machine's heartbeat without firing an offline transition
    #[instrument(skip(self))]
    async fn handle_cancel(&mut self, machine_id: &str) {
        match self.store.delete(&heartbeat_key(machine_id)).await {
            Ok(removed) => {
                debug!("cancelled heartbeat for {machine_id} (was live: {removed})");
                self.machines.remove(machine_id);
            }
            Err(e) => {
                error!("failed to cancel heartbeat for {machine_id}: {e}");
            }
        }
    }

    /// React to an expired key from the store feed
    async fn handle_expired_key(&mut self, key: &str) {
        let Some(machine_id) = parse_heartbeat_key(key) else {
            warn!("dropping malformed expiry key: {key:?}");
            return;
        };
        let machine_id = machine_id.to_string();
        self.transition_offline(&machine_id).await;
    }

    /// Take a machine offline if this worker wins the race to do so
    ///
    /// The lock makes the transition single-winner across workers; the
    /// heartbeat recheck inside the lock catches machines that came
    /// back between the expiry event and now. Rule evaluation happens
    /// while the lock is held, delivery after release.
    #[instrument(skip(self))]
    async fn transition_offline(&mut self, machine_id: &str) {
        // This worker already handled the lapse
        if self.machines.get(machine_id).map(|m| m.state) == Some(MachineState::Offline) {
            return;
        }

        let outcome = match self
            .locks
            .try_acquire(&offline_resource(machine_id), self.config.lock_ttl)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("lock acquisition failed for {machine_id}: {e}");
                return;
            }
        };
        let guard = match outcome {
            AcquireOutcome::Acquired(guard) => guard,
            AcquireOutcome::TimedOut => {
                // Another worker is on it; reconciliation retries if it dies
                debug!("offline transition for {machine_id} already in progress elsewhere");
                return;
            }
        };

        // The machine may have signalled again while we waited
        match self.store.exists(&heartbeat_key(machine_id)).await {
            Ok(true) => {
                debug!("{machine_id} heartbeat re-armed, skipping offline transition");
                guard.release().await;
                return;
            }
            Ok(false) => {}
            Err(e) => {
                error!("heartbeat recheck failed for {machine_id}: {e}");
                guard.release().await;
                return;
            }
        }

        let snapshot = match self.directory.latest_snapshot(machine_id).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!("failed to fetch latest snapshot for {machine_id}: {e}");
                guard.release().await;
                return;
            }
        };
        if let Err(e) = self.directory.mark_offline(machine_id).await {
            error!("failed to mark {machine_id} offline: {e}");
            guard.release().await;
            return;
        }

        let entry = self
            .machines
            .entry(machine_id.to_string())
            .or_insert(TrackedMachine {
                state: MachineState::Live,
                last_seen: Instant::now(),
            });
        entry.state = MachineState::Offline;

        let at = Utc::now();
        debug!("{machine_id} went offline");
        let _ = self.event_tx.send(MonitorEvent::MachineOffline {
            machine_id: machine_id.to_string(),
            at,
        });

        // Evaluate under the lock so duplicate winners cannot interleave
        let snapshot = snapshot.unwrap_or_default();
        let triggered: Vec<AlertRule> = self
            .rules
            .iter()
            .filter(|r| r.applies_to(machine_id))
            .filter(|r| evaluate(r, &snapshot).is_triggered())
            .cloned()
            .collect();

        guard.release().await;

        // Delivery retries can outlast the lock TTL, so dispatch after release
        for rule in triggered {
            debug!("rule '{}' triggered for offline {machine_id}", rule.name);
            let _ = self.event_tx.send(MonitorEvent::RuleTriggered {
                machine_id: machine_id.to_string(),
                rule_id: rule.id,
                rule_name: rule.name.clone(),
                at,
            });
            self.spawn_dispatch(&rule, machine_id, snapshot.clone(), at);
        }
    }

    /// Sweep for machines the expiry feed missed
    ///
    /// A machine counts as stale when this worker has not seen a signal
    /// for a full TTL and the store holds no heartbeat for it.
    #[instrument(skip(self))]
    async fn reconcile(&mut self) {
        let ttl = self.config.heartbeat_ttl;
        let now = Instant::now();
        let stale: Vec<String> = self
            .machines
            .iter()
            .filter(|(_, m)| {
                m.state == MachineState::Live && now.duration_since(m.last_seen) >= ttl
            })
            .map(|(id, _)| id.clone())
            .collect();

        for machine_id in stale {
            match self.store.exists(&heartbeat_key(&machine_id)).await {
                // Another worker keeps the heartbeat fresh
                Ok(true) => continue,
                Ok(false) => {
                    debug!("reconciliation found {machine_id} without a heartbeat");
                    self.transition_offline(&machine_id).await;
                }
                Err(e) => {
                    error!("reconciliation check failed for {machine_id}: {e}");
                }
            }
        }
    }

    /// Hand a triggered rule to the dispatcher on its own task
    fn spawn_dispatch(
        &self,
        rule: &AlertRule,
        machine_id: &str,
        snapshot: OperationalSnapshot,
        at: DateTime<Utc>,
    ) {
        let dispatcher = Arc::clone(&self.dispatcher);
        let rule = rule.clone();
        let ctx = DispatchContext {
            machine_id: machine_id.to_string(),
            machine_display: self.displays.get(machine_id).cloned(),
            snapshot,
            triggered_at: at,
        };
        tokio::spawn(async move {
            let report = dispatcher.dispatch(&rule, &ctx).await;
            if report.failed() > 0 {
                warn!(
                    "dispatch for rule '{}' had {} failed deliveries",
                    rule.name,
                    report.failed()
                );
            }
        });
    }
}

/// Handle for interacting with the monitor actor
#[derive(Clone)]
pub struct MonitorHandle {
    sender: mpsc::Sender<MonitorCommand>,
}

impl MonitorHandle {
    /// Spawn a monitor actor and return a handle to it
    ///
    /// Subscribes to the store's expiry feed before the actor starts,
    /// so no lapse between spawn and first poll is lost.
    pub fn spawn(
        store: Arc<dyn LivenessStore>,
        directory: Arc<dyn MachineDirectory>,
        dispatcher: Arc<Dispatcher>,
        rules: Vec<AlertRule>,
        displays: HashMap<String, String>,
        config: MonitorConfig,
        event_tx: broadcast::Sender<MonitorEvent>,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let expiry_rx = store.subscribe_expiry(HEARTBEAT_PREFIX);
        let locks = LockService::new(Arc::clone(&store));

        let actor = MonitorActor {
            store,
            directory,
            dispatcher,
            locks,
            rules,
            displays,
            config,
            machines: HashMap::new(),
            command_rx,
            expiry_rx,
            event_tx,
        };
        tokio::spawn(actor.run());

        Self { sender: command_tx }
    }

    /// Feed one machine signal into the monitor
    pub async fn submit(&self, signal: MachineSignal) {
        let _ = self.sender.send(MonitorCommand::Submit { signal }).await;
    }

    /// Stop tracking a machine without triggering its offline path
    pub async fn cancel(&self, machine_id: impl Into<String>) {
        let _ = self
            .sender
            .send(MonitorCommand::Cancel {
                machine_id: machine_id.into(),
            })
            .await;
    }

    /// Current liveness of a machine, `None` when untracked
    pub async fn state(&self, machine_id: impl Into<String>) -> Option<MachineState> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(MonitorCommand::GetState {
                machine_id: machine_id.into(),
                respond_to: tx,
            })
            .await
            .ok()?;
        rx.await.ok()?
    }

    /// Shut down the monitor actor
    pub async fn shutdown(&self) {
        let _ = self.sender.send(MonitorCommand::Shutdown).await;
    }
}

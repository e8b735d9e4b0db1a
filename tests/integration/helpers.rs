//! Helper functions for integration tests

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use machine_monitoring::OperationalSnapshot;
use machine_monitoring::actors::{MonitorConfig, MonitorEvent, MonitorHandle};
use machine_monitoring::ingest::{IngestConfig, spawn_ingest};
use machine_monitoring::machines::{InMemoryDirectory, MachineDirectory};
use machine_monitoring::notify::{ChannelKind, Dispatcher, RetryPolicy, WebhookChannel};
use machine_monitoring::rules::{AlertAction, AlertRule, ComparisonOp, Condition, Logic, Priority};
use machine_monitoring::store::{LivenessStore, MemoryStore};
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Rule that fires when `parameter` exceeds `threshold`, notifying the
/// given email recipients with no cool-down
pub fn create_test_rule(
    machine_id: Option<&str>,
    parameter: &str,
    threshold: f64,
    recipients: &[&str],
) -> AlertRule {
    AlertRule {
        id: Uuid::new_v4(),
        customer_id: "customer-1".to_string(),
        machine_id: machine_id.map(str::to_string),
        sensor_id: None,
        name: format!("{parameter} too high"),
        logic: Logic::And,
        enabled: true,
        priority: Priority::High,
        last_triggered: None,
        cooldown_secs: Some(0),
        conditions: vec![Condition {
            parameter: parameter.to_string(),
            op: ComparisonOp::Gt,
            threshold,
            unit: None,
            downtime_reasons: None,
        }],
        actions: vec![AlertAction {
            channel: ChannelKind::Email,
            recipients: recipients.iter().map(|r| r.to_string()).collect(),
            template: String::new(),
        }],
    }
}

/// Retry policy with millisecond delays so tests stay fast
pub fn fast_retry_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_delay: Duration::from_millis(20),
        max_delay: Duration::from_millis(100),
        attempt_timeout: Duration::from_millis(500),
    }
}

/// Dispatcher with a single webhook-backed channel
pub fn webhook_dispatcher(kind: ChannelKind, provider_url: &str, cooldown: Duration) -> Dispatcher {
    let mut dispatcher = Dispatcher::new(cooldown);
    dispatcher.register(
        Arc::new(WebhookChannel::new(kind, provider_url)),
        fast_retry_policy(),
    );
    dispatcher
}

/// A fully wired hub: store, directory, monitor, TCP ingest
pub struct TestHub {
    pub monitor: MonitorHandle,
    pub store: Arc<MemoryStore>,
    pub directory: Arc<InMemoryDirectory>,
    pub events: broadcast::Receiver<MonitorEvent>,
    pub ingest_addr: SocketAddr,
}

pub async fn spawn_test_hub(
    heartbeat_ttl: Duration,
    rules: Vec<AlertRule>,
    dispatcher: Dispatcher,
) -> TestHub {
    let store = Arc::new(MemoryStore::new());
    let directory = Arc::new(InMemoryDirectory::new());
    let (event_tx, events) = broadcast::channel(64);

    // Long reconciliation interval: these tests drive offline
    // transitions through the expiry feed
    let config = MonitorConfig {
        heartbeat_ttl,
        lock_ttl: Duration::from_secs(5),
        reconcile_interval: Duration::from_secs(60),
    };

    let monitor = MonitorHandle::spawn(
        Arc::clone(&store) as Arc<dyn LivenessStore>,
        Arc::clone(&directory) as Arc<dyn MachineDirectory>,
        Arc::new(dispatcher),
        rules,
        HashMap::new(),
        config,
        event_tx,
    );

    let ingest_addr = spawn_ingest(
        IngestConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
        },
        Arc::clone(&directory),
        monitor.clone(),
    )
    .await
    .unwrap();

    TestHub {
        monitor,
        store,
        directory,
        events,
        ingest_addr,
    }
}

/// Push one newline-terminated signal line at the ingest listener and
/// give the hub a moment to process it
pub async fn send_signal_line(addr: SocketAddr, line: &str) {
    let mut conn = tokio::net::TcpStream::connect(addr).await.unwrap();
    conn.write_all(line.as_bytes()).await.unwrap();
    conn.write_all(b"\n").await.unwrap();
    conn.flush().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
}

/// Directory wrapper that counts offline markings and can hold the
/// lock-protected section open for a while
pub struct CountingDirectory {
    inner: InMemoryDirectory,
    offline_markings: AtomicUsize,
    mark_delay: Duration,
}

impl CountingDirectory {
    pub fn new(mark_delay: Duration) -> Self {
        Self {
            inner: InMemoryDirectory::new(),
            offline_markings: AtomicUsize::new(0),
            mark_delay,
        }
    }

    pub fn offline_markings(&self) -> usize {
        self.offline_markings.load(Ordering::SeqCst)
    }

    /// Seed the latest snapshot directly, bypassing the ingest path
    pub async fn record_snapshot(&self, machine_id: &str, snapshot: OperationalSnapshot) {
        self.inner.record_snapshot(machine_id, snapshot).await;
    }
}

#[async_trait]
impl MachineDirectory for CountingDirectory {
    async fn mark_offline(&self, machine_id: &str) -> anyhow::Result<()> {
        tokio::time::sleep(self.mark_delay).await;
        self.offline_markings.fetch_add(1, Ordering::SeqCst);
        self.inner.mark_offline(machine_id).await
    }

    async fn latest_snapshot(
        &self,
        machine_id: &str,
    ) -> anyhow::Result<Option<OperationalSnapshot>> {
        self.inner.latest_snapshot(machine_id).await
    }
}

//! End-to-end tests for the monitoring pipeline
//!
//! These tests drive the system the way production traffic does:
//! - Signals arrive over the TCP ingest listener
//! - Heartbeats lapse into offline transitions
//! - Triggered rules reach a (mock) provider webhook
//!
//! Timers run on the real clock with a short TTL, since the mock
//! provider lives on a real socket.

use std::time::Duration;

use machine_monitoring::actors::{MachineState, MonitorEvent};
use machine_monitoring::machines::MachineStatus;
use machine_monitoring::notify::ChannelKind;
use tokio::sync::broadcast;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

const TTL: Duration = Duration::from_secs(1);

/// Past the TTL plus the store's sweep cadence
const PAST_TTL: Duration = Duration::from_millis(1400);

fn drain_events(events: &mut broadcast::Receiver<MonitorEvent>) -> Vec<MonitorEvent> {
    let mut out = vec![];
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

async fn provider_with_ok_response() -> MockServer {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/send"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;
    mock_server
}

#[tokio::test]
async fn test_signal_then_silence_produces_offline_notification() {
    let provider = provider_with_ok_response().await;

    let rule = create_test_rule(None, "temperature", 90.0, &["ops@example.com"]);
    let dispatcher = webhook_dispatcher(
        ChannelKind::Email,
        &format!("{}/send", provider.uri()),
        Duration::from_secs(300),
    );
    let mut hub = spawn_test_hub(TTL, vec![rule], dispatcher).await;

    send_signal_line(
        hub.ingest_addr,
        r#"{"machine_id":"machine-1","readings":{"temperature":95.0}}"#,
    )
    .await;
    assert_eq!(
        hub.monitor.state("machine-1").await,
        Some(MachineState::Live)
    );

    // Silence until the heartbeat lapses
    tokio::time::sleep(PAST_TTL).await;

    assert_eq!(
        hub.monitor.state("machine-1").await,
        Some(MachineState::Offline)
    );
    assert_eq!(
        hub.directory.status("machine-1").await,
        Some(MachineStatus::Offline)
    );

    // One notification from the inline trigger, one from the offline
    // evaluation of the last snapshot
    let requests = provider.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2, "expected inline + offline notification");

    let events = drain_events(&mut hub.events);
    let offline = events
        .iter()
        .filter(|e| matches!(e, MonitorEvent::MachineOffline { .. }))
        .count();
    let triggered = events
        .iter()
        .filter(|e| matches!(e, MonitorEvent::RuleTriggered { .. }))
        .count();
    assert_eq!(offline, 1);
    assert_eq!(triggered, 2);

    hub.monitor.shutdown().await;
}

#[tokio::test]
async fn test_fresh_signals_keep_the_machine_live() {
    let provider = provider_with_ok_response().await;
    let dispatcher = webhook_dispatcher(
        ChannelKind::Email,
        &format!("{}/send", provider.uri()),
        Duration::from_secs(300),
    );
    let mut hub = spawn_test_hub(TTL, vec![], dispatcher).await;

    send_signal_line(hub.ingest_addr, r#"{"machine_id":"machine-1"}"#).await;
    tokio::time::sleep(Duration::from_millis(600)).await;

    // Refresh before the first heartbeat lapses
    send_signal_line(hub.ingest_addr, r#"{"machine_id":"machine-1"}"#).await;
    tokio::time::sleep(Duration::from_millis(700)).await;

    // A full TTL has passed since the FIRST signal, but not the second
    assert_eq!(
        hub.monitor.state("machine-1").await,
        Some(MachineState::Live)
    );
    assert!(
        drain_events(&mut hub.events)
            .iter()
            .all(|e| !matches!(e, MonitorEvent::MachineOffline { .. }))
    );

    hub.monitor.shutdown().await;
}

#[tokio::test]
async fn test_machine_comes_back_online() {
    let provider = provider_with_ok_response().await;
    let dispatcher = webhook_dispatcher(
        ChannelKind::Email,
        &format!("{}/send", provider.uri()),
        Duration::from_secs(300),
    );
    let mut hub = spawn_test_hub(TTL, vec![], dispatcher).await;

    send_signal_line(
        hub.ingest_addr,
        r#"{"machine_id":"machine-1","readings":{"temperature":40.0}}"#,
    )
    .await;
    tokio::time::sleep(PAST_TTL).await;
    assert_eq!(
        hub.monitor.state("machine-1").await,
        Some(MachineState::Offline)
    );

    send_signal_line(
        hub.ingest_addr,
        r#"{"machine_id":"machine-1","readings":{"temperature":41.0}}"#,
    )
    .await;

    assert_eq!(
        hub.monitor.state("machine-1").await,
        Some(MachineState::Live)
    );
    assert_eq!(
        hub.directory.status("machine-1").await,
        Some(MachineStatus::Online)
    );
    assert!(
        drain_events(&mut hub.events)
            .iter()
            .any(|e| matches!(e, MonitorEvent::MachineBackOnline { .. }))
    );

    hub.monitor.shutdown().await;
}

#[tokio::test]
async fn test_cancel_suppresses_offline_and_its_notification() {
    let provider = provider_with_ok_response().await;

    let rule = create_test_rule(None, "temperature", 90.0, &["ops@example.com"]);
    let dispatcher = webhook_dispatcher(
        ChannelKind::Email,
        &format!("{}/send", provider.uri()),
        Duration::from_secs(300),
    );
    let mut hub = spawn_test_hub(TTL, vec![rule], dispatcher).await;

    send_signal_line(
        hub.ingest_addr,
        r#"{"machine_id":"machine-1","readings":{"temperature":95.0}}"#,
    )
    .await;

    // Decommission before the heartbeat can lapse
    hub.monitor.cancel("machine-1").await;
    tokio::time::sleep(PAST_TTL).await;

    assert_eq!(hub.monitor.state("machine-1").await, None);
    assert!(
        drain_events(&mut hub.events)
            .iter()
            .all(|e| !matches!(e, MonitorEvent::MachineOffline { .. }))
    );

    // Only the inline trigger reached the provider
    let requests = provider.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);

    hub.monitor.shutdown().await;
}

#[tokio::test]
async fn test_liveness_only_machine_goes_offline_without_notifications() {
    let provider = provider_with_ok_response().await;

    let rule = create_test_rule(None, "temperature", 90.0, &["ops@example.com"]);
    let dispatcher = webhook_dispatcher(
        ChannelKind::Email,
        &format!("{}/send", provider.uri()),
        Duration::from_secs(300),
    );
    let mut hub = spawn_test_hub(TTL, vec![rule], dispatcher).await;

    // Heartbeat only, never any readings
    send_signal_line(hub.ingest_addr, r#"{"machine_id":"machine-1"}"#).await;
    tokio::time::sleep(PAST_TTL).await;

    assert_eq!(
        hub.monitor.state("machine-1").await,
        Some(MachineState::Offline)
    );

    // Nothing to evaluate, so nothing was sent
    let requests = provider.received_requests().await.unwrap();
    assert!(requests.is_empty());

    hub.monitor.shutdown().await;
}

#[tokio::test]
async fn test_rule_scoped_to_another_machine_never_fires() {
    let provider = provider_with_ok_response().await;

    let rule = create_test_rule(Some("machine-2"), "temperature", 90.0, &["ops@example.com"]);
    let dispatcher = webhook_dispatcher(
        ChannelKind::Email,
        &format!("{}/send", provider.uri()),
        Duration::from_secs(300),
    );
    let hub = spawn_test_hub(TTL, vec![rule], dispatcher).await;

    send_signal_line(
        hub.ingest_addr,
        r#"{"machine_id":"machine-1","readings":{"temperature":95.0}}"#,
    )
    .await;
    tokio::time::sleep(PAST_TTL).await;

    let requests = provider.received_requests().await.unwrap();
    assert!(requests.is_empty());

    hub.monitor.shutdown().await;
}

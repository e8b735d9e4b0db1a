use std::sync::Arc;

use clap::Parser;
use machine_monitoring::{
    actors::{MonitorEvent, MonitorHandle},
    config::{Config, read_config_file},
    ingest::{IngestConfig, spawn_ingest},
    machines::{InMemoryDirectory, MachineDirectory},
    notify::{Dispatcher, WebhookChannel},
    store::{LivenessStore, MemoryStore},
};
use tokio::sync::broadcast;
use tracing::{debug, info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

/// Buffer size for the monitor event feed
const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: String,
}

fn init() {
    dotenv::dotenv().ok();

    let filter = filter::Targets::new().with_targets(vec![
        ("machine_monitoring", LevelFilter::TRACE),
        ("atalaya_hub", LevelFilter::TRACE),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = read_config_file(&args.file)?;

    let store = Arc::new(MemoryStore::new());
    let directory = Arc::new(InMemoryDirectory::new());
    let dispatcher = Arc::new(build_dispatcher(&config));

    let (event_tx, event_rx) = broadcast::channel(EVENT_CAPACITY);
    tokio::spawn(log_events(event_rx));

    let monitor = MonitorHandle::spawn(
        Arc::clone(&store) as Arc<dyn LivenessStore>,
        Arc::clone(&directory) as Arc<dyn MachineDirectory>,
        dispatcher,
        config.rules.clone().unwrap_or_default(),
        config.display_map(),
        config.monitor_config(),
        event_tx,
    );

    let ingest_config = IngestConfig {
        bind_addr: config.ingest.bind_addr(),
    };
    spawn_ingest(ingest_config, Arc::clone(&directory), monitor.clone()).await?;

    info!("hub running, press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;

    info!("shutting down");
    monitor.shutdown().await;

    Ok(())
}

/// Wire up one webhook-backed channel per configured provider
fn build_dispatcher(config: &Config) -> Dispatcher {
    let mut dispatcher = Dispatcher::new(config.dispatch.cooldown());
    for (kind, settings) in config.dispatch.channels.configured() {
        debug!("registering {kind} channel -> {}", settings.provider_url);
        dispatcher.register(
            Arc::new(WebhookChannel::new(kind, settings.provider_url.clone())),
            settings.retry_policy(),
        );
    }
    dispatcher
}

/// Mirror monitor events into the log
async fn log_events(mut event_rx: broadcast::Receiver<MonitorEvent>) {
    loop {
        match event_rx.recv().await {
            Ok(MonitorEvent::MachineOffline { machine_id, at }) => {
                info!("{machine_id} went offline at {at}");
            }
            Ok(MonitorEvent::MachineBackOnline { machine_id, at }) => {
                info!("{machine_id} is back online at {at}");
            }
            Ok(MonitorEvent::RuleTriggered {
                machine_id,
                rule_name,
                ..
            }) => {
                info!("rule '{rule_name}' triggered for {machine_id}");
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("event logger lagged, skipped {} events", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

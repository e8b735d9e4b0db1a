//! TCP signal ingestion
//!
//! Transport adapter for agents that push signals as newline-delimited
//! JSON over a plain TCP connection. Each decoded signal is written
//! through to the machine directory (so the latest snapshot survives
//! for offline evaluation) and then fed to the monitor.
//!
//! Undecodable lines are dropped without touching the heartbeat: a
//! broken agent must not keep its machine alive.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::MachineSignal;
use crate::actors::MonitorHandle;
use crate::machines::InMemoryDirectory;

/// Ingest listener configuration
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Bind address (e.g., "0.0.0.0:7070")
    pub bind_addr: SocketAddr,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(
                crate::util::get_default_ingest_addr(),
                crate::util::get_default_ingest_port(),
            ),
        }
    }
}

/// Spawn the ingest listener
///
/// Accepts agent connections in a background task and feeds decoded
/// signals to the monitor. Returns the listener's local address.
pub async fn spawn_ingest(
    config: IngestConfig,
    directory: Arc<InMemoryDirectory>,
    monitor: MonitorHandle,
) -> anyhow::Result<SocketAddr> {
    let listener = TcpListener::bind(config.bind_addr).await?;
    let addr = listener.local_addr()?;

    info!("ingest listening on {}", addr);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((socket, peer)) => {
                    debug!("agent connection from {}", peer);
                    let directory = Arc::clone(&directory);
                    let monitor = monitor.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(socket, directory, monitor).await {
                            warn!("agent connection from {} failed: {}", peer, e);
                        }
                    });
                }
                Err(e) => {
                    error!("ingest accept error: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    });

    Ok(addr)
}

/// Read newline-delimited JSON signals until the agent disconnects
async fn handle_connection(
    socket: TcpStream,
    directory: Arc<InMemoryDirectory>,
    monitor: MonitorHandle,
) -> anyhow::Result<()> {
    let mut reader = BufReader::new(socket);
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            // Agent disconnected
            break;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match serde_json::from_str::<MachineSignal>(trimmed) {
            Ok(signal) if signal.machine_id.is_empty() => {
                warn!("dropping signal without a machine id");
            }
            Ok(signal) => {
                let snapshot = signal.snapshot();
                if !snapshot.is_empty() {
                    directory
                        .record_snapshot(&signal.machine_id, snapshot)
                        .await;
                }
                monitor.submit(signal).await;
            }
            Err(e) => {
                warn!("dropping undecodable signal line: {}", e);
            }
        }
    }

    Ok(())
}

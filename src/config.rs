use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use regex::Regex;
use tracing::trace;

use crate::actors::MonitorConfig;
use crate::notify::{ChannelKind, RetryPolicy};
use crate::rules::AlertRule;

/// Heartbeat timing configuration
#[derive(Debug, Clone, serde::Deserialize)]
pub struct HeartbeatConfig {
    /// Seconds a machine stays live without a fresh signal
    #[serde(default = "default_heartbeat_ttl")]
    pub ttl_secs: u64,

    /// Reconciliation sweep interval in seconds; defaults to the TTL
    pub reconcile_interval_secs: Option<u64>,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_heartbeat_ttl(),
            reconcile_interval_secs: None,
        }
    }
}

impl HeartbeatConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs.unwrap_or(self.ttl_secs))
    }
}

fn default_heartbeat_ttl() -> u64 {
    90
}

/// Offline-transition lock configuration
#[derive(Debug, Clone, serde::Deserialize)]
pub struct LockConfig {
    #[serde(default = "default_lock_ttl")]
    pub ttl_secs: u64,

    /// How long an acquire may wait for a held lock; 0 means give up
    /// immediately
    #[serde(default)]
    pub max_wait_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_lock_ttl(),
            max_wait_ms: 0,
        }
    }
}

impl LockConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

fn default_lock_ttl() -> u64 {
    10
}

/// Notification dispatch configuration
#[derive(Debug, Clone, serde::Deserialize)]
pub struct DispatchConfig {
    /// Default per-rule cool-down in seconds; rules may override it
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,

    #[serde(default)]
    pub channels: ChannelTable,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: default_cooldown(),
            channels: ChannelTable::default(),
        }
    }
}

impl DispatchConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

fn default_cooldown() -> u64 {
    300
}

/// Provider settings per channel kind; absent channels are unroutable
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct ChannelTable {
    pub email: Option<ChannelSettings>,
    pub push: Option<ChannelSettings>,
    pub sms: Option<ChannelSettings>,
}

impl ChannelTable {
    /// The channels that actually have a provider configured
    pub fn configured(&self) -> Vec<(ChannelKind, &ChannelSettings)> {
        let mut out = Vec::new();
        if let Some(settings) = &self.email {
            out.push((ChannelKind::Email, settings));
        }
        if let Some(settings) = &self.push {
            out.push((ChannelKind::Push, settings));
        }
        if let Some(settings) = &self.sms {
            out.push((ChannelKind::Sms, settings));
        }
        out
    }
}

/// Retry and endpoint settings for one provider channel
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ChannelSettings {
    pub provider_url: String,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay")]
    pub initial_delay_secs: u64,

    #[serde(default = "default_max_delay")]
    pub max_delay_secs: u64,

    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout_secs: u64,
}

impl ChannelSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_secs(self.initial_delay_secs),
            max_delay: Duration::from_secs(self.max_delay_secs),
            attempt_timeout: Duration::from_secs(self.attempt_timeout_secs),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> u64 {
    1
}

fn default_max_delay() -> u64 {
    30
}

fn default_attempt_timeout() -> u64 {
    10
}

/// One monitored machine
#[derive(Debug, Clone, serde::Deserialize)]
pub struct MachineConfig {
    pub id: String,
    pub display: Option<String>,
}

/// TCP ingest listener settings
#[derive(Debug, Clone, serde::Deserialize)]
pub struct IngestSettings {
    #[serde(default = "crate::util::get_default_ingest_addr")]
    pub addr: IpAddr,

    #[serde(default = "crate::util::get_default_ingest_port")]
    pub port: u16,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            addr: crate::util::get_default_ingest_addr(),
            port: crate::util::get_default_ingest_port(),
        }
    }
}

impl IngestSettings {
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.addr, self.port)
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    #[serde(default)]
    pub lock: LockConfig,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    pub machines: Option<Vec<MachineConfig>>,

    pub rules: Option<Vec<AlertRule>>,

    #[serde(default)]
    pub ingest: IngestSettings,
}

impl Config {
    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            heartbeat_ttl: self.heartbeat.ttl(),
            lock_ttl: self.lock.ttl(),
            reconcile_interval: self.heartbeat.reconcile_interval(),
        }
    }

    /// Machine id to display name, for rendered notifications
    pub fn display_map(&self) -> HashMap<String, String> {
        self.machines
            .iter()
            .flatten()
            .filter_map(|m| m.display.as_ref().map(|d| (m.id.clone(), d.clone())))
            .collect()
    }

    /// Reject configurations that cannot work at runtime
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.heartbeat.ttl_secs == 0 {
            anyhow::bail!("heartbeat.ttl_secs must be positive");
        }
        if self.lock.ttl_secs == 0 {
            anyhow::bail!("lock.ttl_secs must be positive");
        }

        for (kind, settings) in self.dispatch.channels.configured() {
            if settings.provider_url.is_empty() {
                anyhow::bail!("{kind} channel has an empty provider_url");
            }
            if settings.max_attempts == 0 {
                anyhow::bail!("{kind} channel needs max_attempts of at least 1");
            }
        }

        for machine in self.machines.iter().flatten() {
            if machine.id.is_empty() {
                anyhow::bail!("machine entries need a non-empty id");
            }
        }

        let email_re = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$")?;
        let phone_re = Regex::new(r"^\+[1-9]\d{6,14}$")?;
        let token_re = Regex::new(r"^[A-Za-z0-9_:\-]{8,256}$")?;
        for rule in self.rules.iter().flatten() {
            if rule.name.is_empty() {
                anyhow::bail!("rule {} needs a non-empty name", rule.id);
            }
            for action in &rule.actions {
                for recipient in &action.recipients {
                    let ok = match action.channel {
                        ChannelKind::Email => email_re.is_match(recipient),
                        ChannelKind::Sms => phone_re.is_match(recipient),
                        ChannelKind::Push => token_re.is_match(recipient),
                    };
                    if !ok {
                        anyhow::bail!(
                            "rule '{}' has an invalid {} recipient: {recipient:?}",
                            rule.name,
                            action.channel
                        );
                    }
                }
            }
        }

        Ok(())
    }
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    let config: Config = serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("invalid configuration file: {e}"))?;
    config.validate()?;
    trace!("loaded config: {config:?}");
    Ok(config)
}

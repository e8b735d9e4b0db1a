//! Fan-out of triggered rules to registered provider channels
//!
//! One dispatch covers every (action, recipient) pair of the rule. Sends
//! run concurrently and finish independently; a failed recipient shows
//! up in the report next to the delivered ones instead of aborting them.
//!
//! ## Cool-down debounce
//!
//! Dispatches are keyed by (rule id, machine id). A key that fired
//! within its cool-down window is suppressed outright and reported as
//! such with zero deliveries. The window is the rule's override when
//! set, otherwise the global default, and is seeded from the rule's
//! `last_triggered` so restarts do not re-page for a recent event. The
//! map is process-local: this is best-effort dedup, not cross-process
//! exactly-once.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::ChannelKind;
use super::channel::{Delivery, DeliveryOutcome, NotificationChannel, OutboundMessage, SendError};
use super::retry::{RetryPolicy, send_with_retry};
use super::template::{self, TemplateContext};
use crate::OperationalSnapshot;
use crate::rules::{AlertAction, AlertRule};

/// Everything the dispatcher needs to know about the triggering event
#[derive(Debug, Clone)]
pub struct DispatchContext {
    pub machine_id: String,

    /// Human-facing machine name, when configured
    pub machine_display: Option<String>,

    /// Snapshot the rule was evaluated against, for message rendering
    pub snapshot: OperationalSnapshot,

    pub triggered_at: DateTime<Utc>,
}

/// Aggregated outcome of one dispatch
#[derive(Debug)]
pub struct DispatchReport {
    pub rule_id: Uuid,

    pub machine_id: String,

    /// The cool-down swallowed this dispatch; `deliveries` is empty
    pub suppressed: bool,

    pub deliveries: Vec<Delivery>,
}

impl DispatchReport {
    pub fn delivered(&self) -> usize {
        self.deliveries.iter().filter(|d| d.succeeded()).count()
    }

    pub fn failed(&self) -> usize {
        self.deliveries.len() - self.delivered()
    }
}

struct RegisteredChannel {
    channel: Arc<dyn NotificationChannel>,
    policy: RetryPolicy,
}

/// Routes triggered rules to provider channels
pub struct Dispatcher {
    channels: HashMap<ChannelKind, RegisteredChannel>,

    default_cooldown: Duration,

    /// Last dispatch instant per (rule, machine)
    recent: Mutex<HashMap<(Uuid, String), DateTime<Utc>>>,
}

impl Dispatcher {
    pub fn new(default_cooldown: Duration) -> Self {
        Self {
            channels: HashMap::new(),
            default_cooldown,
            recent: Mutex::new(HashMap::new()),
        }
    }

    /// Register a provider adapter with its retry policy. Call once per
    /// channel kind during wiring, before the dispatcher is shared.
    pub fn register(&mut self, channel: Arc<dyn NotificationChannel>, policy: RetryPolicy) {
        let kind = channel.kind();
        self.channels
            .insert(kind, RegisteredChannel { channel, policy });
    }

    /// Notify everyone the rule says to notify about this event.
    #[instrument(skip(self, rule, ctx), fields(rule = %rule.name, machine = %ctx.machine_id))]
    pub async fn dispatch(&self, rule: &AlertRule, ctx: &DispatchContext) -> DispatchReport {
        if self.suppressed_by_cooldown(rule, &ctx.machine_id).await {
            debug!("dispatch suppressed by cool-down");
            return DispatchReport {
                rule_id: rule.id,
                machine_id: ctx.machine_id.clone(),
                suppressed: true,
                deliveries: Vec::new(),
            };
        }

        let mut unroutable = Vec::new();
        let mut sends = Vec::new();

        for action in &rule.actions {
            match self.channels.get(&action.channel) {
                Some(registered) => {
                    let message = Arc::new(self.build_message(rule, action, ctx));

                    for recipient in &action.recipients {
                        let channel = Arc::clone(&registered.channel);
                        let policy = registered.policy.clone();
                        let message = Arc::clone(&message);
                        let recipient = recipient.clone();

                        sends.push(async move {
                            send_with_retry(channel.as_ref(), &policy, &recipient, &message).await
                        });
                    }
                }

                None => {
                    warn!(
                        "no {} channel registered, {} recipient(s) not notified",
                        action.channel,
                        action.recipients.len()
                    );

                    for recipient in &action.recipients {
                        unroutable.push(Delivery {
                            channel: action.channel,
                            recipient: recipient.clone(),
                            attempts: 0,
                            outcome: DeliveryOutcome::Failed(SendError::Permanent {
                                code: None,
                                message: format!("no {} channel registered", action.channel),
                            }),
                        });
                    }
                }
            }
        }

        let mut deliveries = join_all(sends).await;
        deliveries.extend(unroutable);

        let report = DispatchReport {
            rule_id: rule.id,
            machine_id: ctx.machine_id.clone(),
            suppressed: false,
            deliveries,
        };
        debug!(
            "dispatch finished: {} delivered, {} failed",
            report.delivered(),
            report.failed()
        );
        report
    }

    /// Check the cool-down and, if this dispatch goes ahead, record it.
    async fn suppressed_by_cooldown(&self, rule: &AlertRule, machine_id: &str) -> bool {
        let window_secs = rule.cooldown_secs.unwrap_or(self.default_cooldown.as_secs());
        if window_secs == 0 {
            return false;
        }
        let window = chrono::Duration::seconds(window_secs.min(i64::MAX as u64) as i64);

        let now = Utc::now();
        let key = (rule.id, machine_id.to_string());

        let mut recent = self.recent.lock().await;
        let last = recent.get(&key).copied().or(rule.last_triggered);

        if let Some(last) = last
            && now.signed_duration_since(last) < window
        {
            return true;
        }

        recent.insert(key, now);
        false
    }

    fn build_message(
        &self,
        rule: &AlertRule,
        action: &AlertAction,
        ctx: &DispatchContext,
    ) -> OutboundMessage {
        let condition = rule.reporting_condition(&ctx.snapshot);

        let template_ctx = TemplateContext {
            machine: ctx
                .machine_display
                .clone()
                .unwrap_or_else(|| ctx.machine_id.clone()),
            rule: rule.name.clone(),
            parameter: condition.map(|c| c.parameter.clone()),
            value: condition
                .and_then(|c| ctx.snapshot.get(&c.parameter))
                .and_then(|v| v.as_number()),
            unit: condition.and_then(|c| c.unit.clone()),
            threshold: condition.map(|c| c.threshold),
            timestamp: ctx.triggered_at,
        };

        OutboundMessage {
            subject: Some(rule.name.clone()),
            body: template::render(&action.template, &template_ctx),
            priority: rule.priority,
            machine_id: ctx.machine_id.clone(),
            rule_name: rule.name.clone(),
            triggered_at: ctx.triggered_at,
        }
    }
}

//! Notification dispatch
//!
//! Turning a triggered rule into provider calls happens in layers:
//!
//! - [`channel`]: the `NotificationChannel` trait every provider adapter
//!   implements, plus the transient/permanent failure classification
//! - [`retry`]: bounded retry with exponential backoff around one send
//! - [`template`]: placeholder substitution for message bodies
//! - [`dispatcher`]: cool-down debounce, per-action rendering and the
//!   concurrent fan-out across all (action, recipient) pairs
//! - [`webhook`]: the bundled HTTP provider adapter
//!
//! Delivery is at-least-once: the debounce map is process-local, and a
//! send that times out after the provider accepted it will be retried.
//! Providers are expected to deduplicate on their side where that
//! matters.

pub mod channel;
pub mod dispatcher;
pub mod retry;
pub mod template;
pub mod webhook;

pub use channel::{Delivery, DeliveryOutcome, NotificationChannel, OutboundMessage, SendError};
pub use dispatcher::{DispatchContext, DispatchReport, Dispatcher};
pub use retry::{RetryPolicy, send_with_retry};
pub use webhook::WebhookChannel;

use std::fmt;

use serde::{Deserialize, Serialize};

/// The kinds of notification channel a rule action can target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Email,
    Push,
    Sms,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::Email => write!(f, "email"),
            ChannelKind::Push => write!(f, "push"),
            ChannelKind::Sms => write!(f, "sms"),
        }
    }
}

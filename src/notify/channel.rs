//! Provider channel trait and send failure classification

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::ChannelKind;
use crate::rules::Priority;

/// A failed provider send, classified for the retry layer
///
/// The classification is the provider adapter's job: only it can tell a
/// rate limit from an invalid recipient. Anything ambiguous should lean
/// transient, since the retry budget is small and bounded anyway.
#[derive(Debug, Clone)]
pub enum SendError {
    /// Worth retrying: rate limiting, timeouts, transient network faults
    Transient { code: Option<u16>, message: String },

    /// Retrying cannot help: invalid recipient, auth failure, rejected content
    Permanent { code: Option<u16>, message: String },
}

impl SendError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SendError::Transient { .. })
    }

    /// Provider status code, when the failure had one
    pub fn code(&self) -> Option<u16> {
        match self {
            SendError::Transient { code, .. } | SendError::Permanent { code, .. } => *code,
        }
    }
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::Transient { message, .. } => write!(f, "transient failure: {}", message),
            SendError::Permanent { message, .. } => write!(f, "permanent failure: {}", message),
        }
    }
}

impl std::error::Error for SendError {}

/// A rendered notification, ready for a provider
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    /// Subject line for channels that have one
    pub subject: Option<String>,

    pub body: String,

    pub priority: Priority,

    pub machine_id: String,

    pub rule_name: String,

    pub triggered_at: DateTime<Utc>,
}

/// One provider adapter (email gateway, push service, SMS gateway, ...)
///
/// `send` is a single attempt. Retries, backoff and per-attempt timeouts
/// all live in [`super::retry`]; adapters only classify their failures.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn kind(&self) -> ChannelKind;

    async fn send(&self, recipient: &str, message: &OutboundMessage) -> Result<(), SendError>;
}

/// How one send ended up
#[derive(Debug, Clone)]
pub enum DeliveryOutcome {
    Delivered,
    Failed(SendError),
}

/// The record of one (channel, recipient) send, attempts included
#[derive(Debug, Clone)]
pub struct Delivery {
    pub channel: ChannelKind,

    pub recipient: String,

    /// Attempts actually made; 0 means the send never reached a provider
    pub attempts: u32,

    pub outcome: DeliveryOutcome,
}

impl Delivery {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, DeliveryOutcome::Delivered)
    }
}

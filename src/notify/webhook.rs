//! HTTP provider adapter
//!
//! Posts rendered notifications as JSON to a provider endpoint (mail
//! gateway, push bridge, SMS gateway behind an HTTP facade). One adapter
//! instance serves one channel kind against one URL; the `reqwest`
//! client is built once and reused for connection pooling.
//!
//! ## Status classification
//!
//! - 2xx: delivered
//! - 408, 429, 5xx and transport errors: transient, the retry layer may
//!   try again
//! - any other 4xx: permanent (bad recipient, auth, rejected content)

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, instrument};

use super::ChannelKind;
use super::channel::{NotificationChannel, OutboundMessage, SendError};

/// Provider adapter speaking JSON-over-HTTP
pub struct WebhookChannel {
    kind: ChannelKind,
    client: Client,
    url: String,
}

impl WebhookChannel {
    pub fn new(kind: ChannelKind, url: impl Into<String>) -> Self {
        Self {
            kind,
            client: Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    #[instrument(skip(self, recipient, message), fields(channel = %self.kind))]
    async fn send(&self, recipient: &str, message: &OutboundMessage) -> Result<(), SendError> {
        let payload = serde_json::json!({
            "recipient": recipient,
            "subject": message.subject,
            "body": message.body,
            "priority": message.priority,
            "machine": message.machine_id,
            "rule": message.rule_name,
            "triggered_at": message.triggered_at,
        });

        let response = match self.client.post(&self.url).json(&payload).send().await {
            Ok(response) => response,
            Err(e) => {
                return Err(SendError::Transient {
                    code: None,
                    message: format!("transport: {e}"),
                });
            }
        };

        let status = response.status().as_u16();
        if (200..300).contains(&status) {
            debug!("provider accepted message");
            return Ok(());
        }

        Err(classify_status(status))
    }
}

fn classify_status(status: u16) -> SendError {
    let message = format!("provider returned HTTP {status}");

    // 408 and 429 are the retryable 4xx codes
    if status == 408 || status == 429 || (500..600).contains(&status) {
        SendError::Transient {
            code: Some(status),
            message,
        }
    } else {
        SendError::Permanent {
            code: Some(status),
            message,
        }
    }
}

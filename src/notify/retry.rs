//! Bounded retry with exponential backoff around a single provider send
//!
//! Only transient failures are retried. The backoff ladder doubles from
//! `initial_delay` and is capped at `max_delay`, so with the defaults a
//! full cycle is three attempts with 1 s and 2 s waits in between. Every
//! attempt runs under its own timeout, and a timeout is treated as a
//! transient failure.

use std::time::Duration;

use tracing::{debug, warn};

use super::channel::{Delivery, DeliveryOutcome, NotificationChannel, OutboundMessage, SendError};

/// Retry behaviour for one channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, first one included
    pub max_attempts: u32,

    /// Backoff after the first failed attempt
    pub initial_delay: Duration,

    /// Backoff ceiling
    pub max_delay: Duration,

    /// Budget for a single provider call
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            attempt_timeout: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Backoff after the `attempt`-th failure (1-based):
    /// `min(initial_delay * 2^(attempt - 1), max_delay)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let doublings = attempt.saturating_sub(1);
        let factor = 2u32.checked_pow(doublings).unwrap_or(u32::MAX);

        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Drive one (channel, recipient) send to completion under the policy.
///
/// Returns the full attempt record either way; the caller decides what a
/// failed delivery means for the dispatch as a whole.
pub async fn send_with_retry(
    channel: &dyn NotificationChannel,
    policy: &RetryPolicy,
    recipient: &str,
    message: &OutboundMessage,
) -> Delivery {
    let mut attempts = 0;

    loop {
        attempts += 1;

        let result = match tokio::time::timeout(
            policy.attempt_timeout,
            channel.send(recipient, message),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(SendError::Transient {
                code: None,
                message: format!("attempt timed out after {:?}", policy.attempt_timeout),
            }),
        };

        match result {
            Ok(()) => {
                debug!("{} delivery succeeded on attempt {attempts}", channel.kind());
                return Delivery {
                    channel: channel.kind(),
                    recipient: recipient.to_string(),
                    attempts,
                    outcome: DeliveryOutcome::Delivered,
                };
            }

            Err(error) if error.is_transient() && attempts < policy.max_attempts => {
                let delay = policy.delay_for_attempt(attempts);
                debug!(
                    "{} attempt {attempts}/{} failed ({error}), retrying in {delay:?}",
                    channel.kind(),
                    policy.max_attempts
                );
                tokio::time::sleep(delay).await;
            }

            Err(error) => {
                warn!(
                    "{} delivery failed after {attempts} attempt(s): {error}",
                    channel.kind()
                );
                return Delivery {
                    channel: channel.kind(),
                    recipient: recipient.to_string(),
                    attempts,
                    outcome: DeliveryOutcome::Failed(error),
                };
            }
        }
    }
}

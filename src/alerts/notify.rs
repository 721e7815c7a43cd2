//! Notification channel port.
//!
//! Channels return a plain success flag per attempt and never propagate
//! errors back into the alert engine; a failed channel is logged and the
//! remaining channels still run. The actual email/push providers sit behind
//! an external relay and are out of scope for the core.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tracing::{error, warn};

// ---

/// One formatted alert handed to every configured channel.
#[derive(Debug, Clone, Serialize)]
pub struct AlertMessage {
    /// Correlation id, also written to the audit trail.
    pub alert_id: uuid::Uuid,
    pub device_id: String,
    pub device_name: String,
    pub timestamp: DateTime<Utc>,
    pub subject: String,
    /// Structured breach line items.
    pub lines: Vec<String>,
    pub insight: String,
    pub risk_level: String,
    pub recipients: Vec<String>,
}

/// Outbound delivery port. Implementations must be failure-isolated:
/// a `false` return is the only signal the engine sees.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Stable channel name, recorded in the audit trail.
    fn name(&self) -> &'static str;

    async fn deliver(&self, alert: &AlertMessage) -> bool;
}

// ---

/// Console/log sink standing in for the web-push channel: emits the short
/// form of the alert as a structured warning. Always succeeds.
pub struct PushLogChannel;

#[async_trait]
impl NotificationChannel for PushLogChannel {
    fn name(&self) -> &'static str {
        "push"
    }

    async fn deliver(&self, alert: &AlertMessage) -> bool {
        // ---
        warn!(
            device = %alert.device_name,
            risk = %alert.risk_level,
            recipients = alert.recipients.len(),
            "ALERT: {}",
            alert.lines.join(" | ")
        );
        true
    }
}

// ---

/// Posts the full alert JSON to a configured relay endpoint (the email-style
/// rich message). The relay owns SMTP details; the core only sees a boolean.
pub struct EmailRelayChannel {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl EmailRelayChannel {
    pub fn new(client: reqwest::Client, endpoint: String, timeout: Duration) -> Self {
        // ---
        EmailRelayChannel {
            client,
            endpoint,
            timeout,
        }
    }
}

#[async_trait]
impl NotificationChannel for EmailRelayChannel {
    fn name(&self) -> &'static str {
        "email"
    }

    async fn deliver(&self, alert: &AlertMessage) -> bool {
        // ---
        let result = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(alert)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                error!(
                    "Alert relay returned {} for device {}",
                    response.status(),
                    alert.device_id
                );
                false
            }
            Err(e) => {
                error!("Failed to reach alert relay: {}", e);
                false
            }
        }
    }
}

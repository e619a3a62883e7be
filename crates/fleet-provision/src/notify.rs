//! Best-effort customer notifications.
//!
//! The executor posts a notification after a lifecycle change has been
//! committed. Delivery failures are the caller's to log and swallow; they
//! never turn a successful operation into a failed one.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;

use fleet_core::Tier;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("webhook returned HTTP {0}")]
    Status(u16),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("no answer within {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NotificationKind {
    Resized { from: Tier, to: Tier },
    Suspended,
    Unsuspended,
    Terminated,
}

/// What happened to a customer's bot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub deployment_id: String,
    pub customer_id: String,
    pub guild_id: String,
    #[serde(flatten)]
    pub kind: NotificationKind,
}

impl Notification {
    /// Human-readable one-liner.
    pub fn message(&self) -> String {
        match &self.kind {
            NotificationKind::Resized { from, to } if to > from => {
                format!("Your bot was upgraded from {from} to {to} resources.")
            }
            NotificationKind::Resized { from, to } => {
                format!("Your bot was moved from {from} to {to} resources.")
            }
            NotificationKind::Suspended => "Your bot has been suspended.".to_string(),
            NotificationKind::Unsuspended => "Your bot is running again.".to_string(),
            NotificationKind::Terminated => "Your bot has been shut down.".to_string(),
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Posts notifications as JSON to a webhook (Discord-compatible `content`).
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    content: String,
    #[serde(flatten)]
    notification: &'a Notification,
}

impl WebhookNotifier {
    /// Every delivery, connect included, gives up after `timeout`.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, NotifyError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let payload = WebhookPayload {
            content: notification.message(),
            notification,
        };
        let response = self.client.post(&self.url).json(&payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Status(status.as_u16()));
        }
        Ok(())
    }
}

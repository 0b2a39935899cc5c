//! Chat notifications.
//!
//! Notifications are fire-and-forget: [`NotificationDispatcher`] spawns each
//! send and logs failures. Nothing here can fail a workflow operation.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const TELEGRAM_API: &str = "https://api.telegram.org";

/// Telegram caps messages at 4096 characters.
const MAX_MESSAGE_CHARS: usize = 4000;

/// Which audience a notification is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Routine progress: status changes, merges, questions.
    Updates,
    /// Failures that need a human.
    Alerts,
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification request failed: {0}")]
    Request(String),

    #[error("notification API returned {status}: {body}")]
    Api { status: u16, body: String },
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_message(&self, channel: Channel, text: &str) -> Result<(), NotifyError>;
}

/// Telegram Bot API `sendMessage`.
pub struct TelegramNotifier {
    client: ClientWithMiddleware,
    bot_token: String,
    updates_chat_id: String,
    /// Falls back to the updates chat when unset.
    alerts_chat_id: Option<String>,
}

impl TelegramNotifier {
    pub fn new(
        client: ClientWithMiddleware,
        bot_token: String,
        updates_chat_id: String,
        alerts_chat_id: Option<String>,
    ) -> Self {
        Self {
            client,
            bot_token,
            updates_chat_id,
            alerts_chat_id,
        }
    }

    fn chat_for(&self, channel: Channel) -> &str {
        match channel {
            Channel::Updates => &self.updates_chat_id,
            Channel::Alerts => self
                .alerts_chat_id
                .as_deref()
                .unwrap_or(&self.updates_chat_id),
        }
    }
}

fn truncate(text: &str) -> String {
    if text.chars().count() <= MAX_MESSAGE_CHARS {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(MAX_MESSAGE_CHARS).collect();
    truncated.push_str("\n[truncated]");
    truncated
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send_message(&self, channel: Channel, text: &str) -> Result<(), NotifyError> {
        let url = format!("{}/bot{}/sendMessage", TELEGRAM_API, self.bot_token);
        let body = serde_json::json!({
            "chat_id": self.chat_for(channel),
            "text": truncate(text),
            "disable_web_page_preview": true,
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| NotifyError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Api { status, body });
        }
        Ok(())
    }
}

/// Spawns notification sends and keeps their handles so they can be awaited
/// on shutdown.
#[derive(Clone, Default)]
pub struct NotificationDispatcher {
    notifier: Option<Arc<dyn Notifier>>,
    in_flight: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl NotificationDispatcher {
    pub fn new(notifier: Option<Arc<dyn Notifier>>) -> Self {
        Self {
            notifier,
            in_flight: Arc::default(),
        }
    }

    /// A dispatcher that only logs.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn dispatch(&self, channel: Channel, message: impl Into<String>) {
        let message = message.into();
        let Some(notifier) = self.notifier.clone() else {
            info!("[{:?}] {}", channel, message);
            return;
        };

        let handle = tokio::spawn(async move {
            match notifier.send_message(channel, &message).await {
                Ok(()) => debug!("Sent {:?} notification", channel),
                Err(e) => warn!("Failed to send {:?} notification: {}", channel, e),
            }
        });

        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        in_flight.retain(|handle| !handle.is_finished());
        in_flight.push(handle);
    }

    /// Wait for every notification dispatched so far.
    pub async fn flush(&self) {
        let handles: Vec<_> = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            in_flight.drain(..).collect()
        };
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Notification task failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingNotifier;

    #[tokio::test]
    async fn test_dispatch_sends_after_flush() {
        let notifier = Arc::new(RecordingNotifier::default());
        let dispatcher = NotificationDispatcher::new(Some(notifier.clone()));

        dispatcher.dispatch(Channel::Updates, "moved");
        dispatcher.dispatch(Channel::Alerts, "broken");
        dispatcher.flush().await;

        let mut sent = notifier.messages();
        sent.sort_by(|a, b| a.1.cmp(&b.1));
        assert_eq!(
            sent,
            vec![
                (Channel::Alerts, "broken".to_string()),
                (Channel::Updates, "moved".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_failures_do_not_propagate() {
        let notifier = Arc::new(RecordingNotifier::failing());
        let dispatcher = NotificationDispatcher::new(Some(notifier.clone()));
        dispatcher.dispatch(Channel::Updates, "lost");
        dispatcher.flush().await;
        assert!(notifier.messages().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_dispatcher_is_a_no_op() {
        let dispatcher = NotificationDispatcher::disabled();
        dispatcher.dispatch(Channel::Updates, "nobody listens");
        dispatcher.flush().await;
    }

    #[test]
    fn test_alerts_fall_back_to_updates_chat() {
        let client = reqwest_middleware::ClientBuilder::new(reqwest::Client::new()).build();
        let notifier = TelegramNotifier::new(client, "t".to_string(), "100".to_string(), None);
        assert_eq!(notifier.chat_for(Channel::Alerts), "100");
    }

    #[test]
    fn test_long_messages_are_truncated() {
        let text = "x".repeat(5000);
        let truncated = truncate(&text);
        assert!(truncated.ends_with("[truncated]"));
        assert!(truncated.chars().count() < 4100);
        assert_eq!(truncate("short"), "short");
    }
}

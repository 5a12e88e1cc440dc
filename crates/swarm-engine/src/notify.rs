use std::time::Duration;

use futures::future::BoxFuture;
use tracing::{info, warn};

use swarm_core::config::TelegramConfig;
use swarm_core::error::{Result, SwarmError};
use swarm_core::traits::Notifier;
use swarm_core::types::{Notification, Severity};

/// Writes notifications to the log. Used when no operator channel is configured.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    fn notify(&self, notification: Notification) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            match notification.severity {
                Severity::Info => info!(title = %notification.title, "{}", notification.body),
                Severity::Warning | Severity::Critical => {
                    warn!(title = %notification.title, "{}", notification.body)
                }
            }
            Ok(())
        })
    }
}

/// Sends notifications through the Telegram Bot API.
pub struct TelegramNotifier {
    client: reqwest::Client,
    api_base: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(config: &TelegramConfig) -> Result<Self> {
        Self::with_api_base(config, "https://api.telegram.org")
    }

    /// Point at a different API host (tests, proxies).
    pub fn with_api_base(config: &TelegramConfig, base: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| SwarmError::Config(format!("telegram client: {}", e)))?;
        Ok(Self {
            client,
            api_base: format!("{}/bot{}", base.trim_end_matches('/'), config.bot_token),
            chat_id: config.chat_id.clone(),
        })
    }
}

fn render(notification: &Notification) -> String {
    let icon = match notification.severity {
        Severity::Info => "ℹ️",
        Severity::Warning => "⚠️",
        Severity::Critical => "🚨",
    };
    format!("{} {}\n\n{}", icon, notification.title, notification.body)
}

impl Notifier for TelegramNotifier {
    fn name(&self) -> &str {
        "telegram"
    }

    fn notify(&self, notification: Notification) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let body = serde_json::json!({
                "chat_id": self.chat_id,
                "text": render(&notification),
            });
            let resp = self
                .client
                .post(format!("{}/sendMessage", self.api_base))
                .json(&body)
                .send()
                .await
                .map_err(|e| SwarmError::Notify {
                    channel: "telegram".into(),
                    message: e.to_string(),
                })?;
            if !resp.status().is_success() {
                return Err(SwarmError::Notify {
                    channel: "telegram".into(),
                    message: format!("sendMessage returned {}", resp.status()),
                });
            }
            Ok(())
        })
    }
}

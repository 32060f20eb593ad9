//! Outbound notifications
//!
//! Renewal notices and settlement confirmations go out via a Telegram bot.
//! Delivery is fire-and-forget: a failed send is logged and never rolls back
//! or delays the transaction that triggered it.

use serde_json::json;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct Notifier {
    http: reqwest::Client,
    bot_token: Option<String>,
    chat_id: Option<String>,
}

impl Notifier {
    /// Reads `TELEGRAM_BOT_TOKEN` / `TELEGRAM_CHAT_ID`; either missing yields
    /// a disabled notifier that only logs.
    pub fn from_env() -> Self {
        Self {
            http: reqwest::Client::new(),
            bot_token: std::env::var("TELEGRAM_BOT_TOKEN").ok(),
            chat_id: std::env::var("TELEGRAM_CHAT_ID").ok(),
        }
    }

    pub fn disabled() -> Self {
        Self {
            http: reqwest::Client::new(),
            bot_token: None,
            chat_id: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.bot_token.is_some() && self.chat_id.is_some()
    }

    /// Queues one message for delivery and returns immediately. `recipient`
    /// overrides the configured default chat.
    pub fn send(&self, recipient: Option<&str>, text: &str) {
        let chat_id = recipient
            .map(str::to_string)
            .or_else(|| self.chat_id.clone());
        let (Some(token), Some(chat_id)) = (self.bot_token.clone(), chat_id) else {
            debug!(%text, "notifier disabled, message logged only");
            return;
        };

        let http = self.http.clone();
        let url = format!("https://api.telegram.org/bot{token}/sendMessage");
        let body = json!({ "chat_id": chat_id, "text": text });
        tokio::spawn(async move {
            match http.post(&url).json(&body).send().await {
                Ok(resp) if resp.status().is_success() => {}
                Ok(resp) => {
                    warn!(status = %resp.status(), "notification delivery rejected")
                }
                Err(e) => warn!(error = %e, "notification delivery failed"),
            }
        });
    }
}

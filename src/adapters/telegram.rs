//! Telegram Bot API sink.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::{source::AlertSink, Error, Result};

const API_BASE: &str = "https://api.telegram.org";

/// Posts HTML messages to one chat via `sendMessage`.
#[derive(Clone)]
pub struct TelegramSink {
    client: reqwest::Client,
    url: String,
    chat_id: String,
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
}

impl TelegramSink {
    pub fn new(bot_token: &str, chat_id: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::InvalidConfig(format!("http client: {e}")))?;
        Ok(Self {
            client,
            url: format!("{API_BASE}/bot{bot_token}/sendMessage"),
            chat_id: chat_id.into(),
        })
    }
}

#[async_trait]
impl AlertSink for TelegramSink {
    async fn send(&self, text: &str) {
        if text.trim().is_empty() {
            return;
        }

        let payload = SendMessage {
            chat_id: &self.chat_id,
            text,
            parse_mode: "HTML",
        };
        let result = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status);

        match result {
            Ok(_) => debug!(chat_id = %self.chat_id, "telegram message delivered"),
            // reqwest errors carry the URL, which embeds the bot token
            Err(e) => warn!(error = %e.without_url(), "telegram send failed"),
        }
    }
}

impl std::fmt::Debug for TelegramSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramSink")
            .field("chat_id", &self.chat_id)
            .finish()
    }
}

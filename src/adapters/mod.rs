//! Concrete collaborators wired up by the binary.

pub mod oanda;
pub mod telegram;

use async_trait::async_trait;
use tracing::info;

use crate::source::AlertSink;

pub use oanda::OandaSource;
pub use telegram::TelegramSink;

/// Writes alerts to the log. Used when no Telegram credentials are configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl AlertSink for LogSink {
    async fn send(&self, text: &str) {
        if text.trim().is_empty() {
            return;
        }
        info!(target: "pivotwatch::alert", "\n{text}");
    }
}

//! Telegram Bot API notifier.
//!
//! API docs: https://core.telegram.org/bots/api#sendmessage
//! Endpoint: POST https://api.telegram.org/bot{token}/sendMessage
//! Messages are capped at 4096 characters; longer reports are split.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use super::{split_message, Notifier};
use crate::sources::http_client;
use crate::types::ScanError;

const API_BASE: &str = "https://api.telegram.org";

/// Leaves headroom under the 4096 hard limit for entity parsing.
const MESSAGE_LIMIT: usize = 4000;

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
}

pub struct TelegramNotifier {
    http: Client,
    api_base: String,
    token: SecretString,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(token: SecretString, chat_id: String, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: http_client(timeout)?,
            api_base: API_BASE.to_string(),
            token,
            chat_id,
        })
    }

    /// Point at a different Bot API host (local bot server, tests).
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_base, self.token.expose_secret())
    }

    async fn send_chunk(&self, text: &str) -> Result<(), ScanError> {
        let body = SendMessage {
            chat_id: &self.chat_id,
            text,
            parse_mode: "Markdown",
            disable_web_page_preview: true,
        };

        // The URL carries the token, so it is stripped from errors.
        let resp = self
            .http
            .post(self.endpoint())
            .json(&body)
            .send()
            .await
            .map_err(|e| ScanError::Notifier(e.without_url().to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let detail = resp.text().await.unwrap_or_default();
            return Err(ScanError::Notifier(format!("Telegram API error {status}: {detail}")));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str) -> Result<(), ScanError> {
        let chunks = split_message(text, MESSAGE_LIMIT);
        debug!(chunks = chunks.len(), "Sending Telegram report");
        for chunk in &chunks {
            self.send_chunk(chunk).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notifier() -> TelegramNotifier {
        TelegramNotifier::new(
            SecretString::new("123:abc".to_string()),
            "-10042".to_string(),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_endpoint() {
        assert_eq!(
            notifier().endpoint(),
            "https://api.telegram.org/bot123:abc/sendMessage"
        );
        assert_eq!(
            notifier().with_api_base("http://localhost:8081/").endpoint(),
            "http://localhost:8081/bot123:abc/sendMessage"
        );
    }

    #[test]
    fn test_debug_hides_token() {
        let n = notifier();
        assert!(!format!("{:?}", n.token).contains("abc"));
    }

    #[test]
    fn test_payload_shape() {
        let body = SendMessage {
            chat_id: "-10042",
            text: "*BUY*",
            parse_mode: "Markdown",
            disable_web_page_preview: true,
        };
        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(v["chat_id"], "-10042");
        assert_eq!(v["parse_mode"], "Markdown");
    }

    #[tokio::test]
    async fn test_unreachable_api_is_notifier_error() {
        let n = notifier().with_api_base("http://127.0.0.1:9");
        match n.send("hello").await {
            Err(ScanError::Notifier(msg)) => assert!(!msg.contains("123:abc")),
            other => panic!("expected notifier error, got {other:?}"),
        }
    }
}

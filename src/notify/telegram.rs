use super::{Markup, Notifier, check_response, http_client, render_alerts, render_summary};
use crate::models::PriceAlert;
use anyhow::{Context, Result, ensure};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

const API_BASE: &str = "https://api.telegram.org";

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
}

/// Telegram bot `sendMessage` channel.
pub struct TelegramNotifier {
    client: reqwest::Client,
    endpoint: Url,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(token: &str, chat_id: &str, timeout: Duration) -> Result<Self> {
        ensure!(!token.is_empty(), "Telegram token not set");
        ensure!(!chat_id.is_empty(), "Telegram chat id not set");
        let endpoint = Url::parse(&format!("{}/bot{}/sendMessage", API_BASE, token))
            .context("Invalid Telegram endpoint")?;
        Ok(Self {
            client: http_client(timeout)?,
            endpoint,
            chat_id: chat_id.to_string(),
        })
    }

    async fn send(&self, text: &str) -> Result<()> {
        let payload = SendMessage { chat_id: &self.chat_id, text, parse_mode: "MarkdownV2" };
        let resp = self
            .client
            .post(self.endpoint.clone())
            .json(&payload)
            .send()
            .await
            // the URL carries the bot token
            .map_err(|e| e.without_url())
            .context("Telegram request failed")?;
        check_response(resp, "Telegram").await
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send_summary(&self, prices: &BTreeMap<String, String>) -> Result<()> {
        self.send(&render_summary(prices, Markup::MarkdownV2)).await
    }

    async fn send_alerts(&self, alerts: &[PriceAlert]) -> Result<()> {
        if alerts.is_empty() {
            return Ok(());
        }
        self.send(&render_alerts(alerts, Markup::MarkdownV2)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_shape() {
        let payload = SendMessage { chat_id: "42", text: "hi", parse_mode: "MarkdownV2" };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["chat_id"], "42");
        assert_eq!(json["parse_mode"], "MarkdownV2");
    }

    #[test]
    fn test_rejects_blank_credentials() {
        assert!(TelegramNotifier::new("", "42", Duration::from_secs(1)).is_err());
        assert!(TelegramNotifier::new("abc", "", Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn test_empty_alert_batch_sends_nothing() {
        // unroutable endpoint: any real request would fail
        let mut n = TelegramNotifier::new("abc", "42", Duration::from_millis(10)).unwrap();
        n.endpoint = Url::parse("http://127.0.0.1:9/unused").unwrap();
        assert!(n.send_alerts(&[]).await.is_ok());
    }

    #[tokio::test]
    async fn test_send_error_hides_token() {
        let token = "123456:SECRET-token";
        let mut n = TelegramNotifier::new(token, "42", Duration::from_secs(2)).unwrap();
        n.endpoint = Url::parse(&format!("http://127.0.0.1:9/bot{}/sendMessage", token)).unwrap();

        let prices = BTreeMap::from([("AAPL".to_string(), "227.48".to_string())]);
        let err = n.send_summary(&prices).await.unwrap_err();
        let msg = format!("{:#} {:?}", err, err);
        assert!(!msg.contains("SECRET"), "token leaked: {msg}");
    }
}

use super::{Markup, Notifier, check_response, http_client, render_alerts, render_summary};
use crate::models::PriceAlert;
use anyhow::{Context, Result, ensure};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

const BROADCAST_URL: &str = "https://api.line.me/v2/bot/message/broadcast";

#[derive(Serialize)]
struct Broadcast<'a> {
    messages: [TextMessage<'a>; 1],
}

#[derive(Serialize)]
struct TextMessage<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    text: &'a str,
}

impl<'a> Broadcast<'a> {
    fn text(text: &'a str) -> Self {
        Self { messages: [TextMessage { kind: "text", text }] }
    }
}

/// LINE Messaging API broadcast channel.
pub struct LineNotifier {
    client: reqwest::Client,
    endpoint: String,
    token: String,
}

impl LineNotifier {
    pub fn new(token: &str, timeout: Duration) -> Result<Self> {
        ensure!(!token.is_empty(), "LINE channel access token not set");
        Ok(Self {
            client: http_client(timeout)?,
            endpoint: BROADCAST_URL.to_string(),
            token: token.to_string(),
        })
    }

    async fn send(&self, text: &str) -> Result<()> {
        // Lets LINE drop duplicates if this request is ever replayed
        let retry_key = Uuid::new_v4().to_string();
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .header("X-Line-Retry-Key", retry_key)
            .json(&Broadcast::text(text))
            .send()
            .await
            .context("LINE request failed")?;
        check_response(resp, "LINE").await
    }
}

#[async_trait]
impl Notifier for LineNotifier {
    async fn send_summary(&self, prices: &BTreeMap<String, String>) -> Result<()> {
        self.send(&render_summary(prices, Markup::Plain)).await
    }

    async fn send_alerts(&self, alerts: &[PriceAlert]) -> Result<()> {
        if alerts.is_empty() {
            return Ok(());
        }
        self.send(&render_alerts(alerts, Markup::Plain)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_payload() {
        let json = serde_json::to_value(Broadcast::text("📊 report")).unwrap();
        assert_eq!(json["messages"][0]["type"], "text");
        assert_eq!(json["messages"][0]["text"], "📊 report");
    }

    #[test]
    fn test_rejects_blank_token() {
        assert!(LineNotifier::new("", Duration::from_secs(1)).is_err());
    }
}

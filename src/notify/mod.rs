//! Outbound notifications: daily summary and batched price alerts.

pub mod line;
pub mod telegram;

use crate::config::{Channel, NotifyConfig};
use crate::models::PriceAlert;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use self::line::LineNotifier;
use self::telegram::TelegramNotifier;

/// Sink for report and alert messages.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_summary(&self, prices: &BTreeMap<String, String>) -> Result<()>;

    /// An empty batch is a no-op.
    async fn send_alerts(&self, alerts: &[PriceAlert]) -> Result<()>;
}

pub fn from_config(config: &NotifyConfig) -> Result<Arc<dyn Notifier>> {
    let timeout = Duration::from_secs(config.timeout_secs);
    let notifier: Arc<dyn Notifier> = match config.channel {
        Channel::Telegram => {
            let (Some(token), Some(chat_id)) = (&config.telegram_token, &config.telegram_chat_id)
            else {
                bail!("Telegram channel needs a bot token and a chat id");
            };
            Arc::new(TelegramNotifier::new(token, chat_id, timeout)?)
        }
        Channel::Line => {
            let Some(token) = &config.line_token else {
                bail!("LINE channel needs a channel access token");
            };
            Arc::new(LineNotifier::new(token, timeout)?)
        }
        Channel::Log => Arc::new(LogNotifier),
    };
    Ok(notifier)
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to build HTTP client")
}

/// Turns a non-2xx response into an error carrying the body.
pub(crate) async fn check_response(resp: reqwest::Response, channel: &str) -> Result<()> {
    let status = resp.status();
    info!("{} push response: {}", channel, status);
    if status.as_u16() >= 400 {
        let body = resp.text().await.unwrap_or_default();
        bail!("{} rejected message: HTTP {} {}", channel, status, body.trim());
    }
    Ok(())
}

// ── Rendering ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Markup {
    Plain,
    MarkdownV2,
}

impl Markup {
    /// Telegram MarkdownV2 reserves these everywhere, inside entities too.
    const RESERVED: &'static [char] = &[
        '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!', '\\',
    ];

    fn escape(self, s: &str) -> String {
        match self {
            Markup::Plain => s.to_string(),
            Markup::MarkdownV2 => {
                let mut out = String::with_capacity(s.len());
                for ch in s.chars() {
                    if Self::RESERVED.contains(&ch) {
                        out.push('\\');
                    }
                    out.push(ch);
                }
                out
            }
        }
    }

    fn bold(self, s: &str) -> String {
        match self {
            Markup::Plain => s.to_string(),
            Markup::MarkdownV2 => format!("*{}*", self.escape(s)),
        }
    }
}

pub fn render_summary(prices: &BTreeMap<String, String>, markup: Markup) -> String {
    let mut msg = format!("📊 {}\n\n", markup.bold("Daily Stock Report"));
    for (symbol, price) in prices {
        let _ = writeln!(msg, "{}: {}", markup.bold(symbol), markup.escape(price));
    }
    msg
}

pub fn render_alerts(alerts: &[PriceAlert], markup: Markup) -> String {
    let mut msg = format!("⚠️ {}\n\n", markup.bold("Significant Price Changes Detected"));
    for alert in alerts {
        let direction = if alert.is_increase() { "🟢 Increased" } else { "🔴 Decreased" };
        let pct = format!("{:.2}%", alert.percent_change.abs());
        let _ = writeln!(msg, "{}: {} by {}", markup.bold(&alert.symbol), direction, markup.bold(&pct));
        let prices = format!(
            "Previous: ${:.2} → Current: ${:.2}",
            alert.previous_price, alert.current_price
        );
        let _ = writeln!(msg, "{}\n", markup.escape(&prices));
    }
    msg
}

// ── Log channel ───────────────────────────────────────────────────────────────

/// Writes messages to the log instead of sending them.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_summary(&self, prices: &BTreeMap<String, String>) -> Result<()> {
        info!("\n{}", render_summary(prices, Markup::Plain));
        Ok(())
    }

    async fn send_alerts(&self, alerts: &[PriceAlert]) -> Result<()> {
        if alerts.is_empty() {
            return Ok(());
        }
        info!("\n{}", render_alerts(alerts, Markup::Plain));
        Ok(())
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Captures everything it is asked to send.
    #[derive(Default)]
    pub struct RecordingNotifier {
        pub summaries: Mutex<Vec<BTreeMap<String, String>>>,
        pub alert_batches: Mutex<Vec<Vec<PriceAlert>>>,
        pub fail: AtomicBool,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send_summary(&self, prices: &BTreeMap<String, String>) -> Result<()> {
            self.summaries.lock().unwrap().push(prices.clone());
            if self.fail.load(Ordering::SeqCst) {
                bail!("HTTP 500");
            }
            Ok(())
        }

        async fn send_alerts(&self, alerts: &[PriceAlert]) -> Result<()> {
            self.alert_batches.lock().unwrap().push(alerts.to_vec());
            if self.fail.load(Ordering::SeqCst) {
                bail!("HTTP 500");
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone};

    fn alert(symbol: &str, prev: f64, cur: f64) -> PriceAlert {
        PriceAlert {
            symbol: symbol.into(),
            previous_price: prev,
            current_price: cur,
            percent_change: (cur - prev) / prev * 100.0,
            triggered_at: FixedOffset::east_opt(9 * 3600)
                .unwrap()
                .with_ymd_and_hms(2026, 3, 4, 23, 30, 0)
                .unwrap(),
        }
    }

    #[test]
    fn test_render_summary_lists_each_symbol() {
        let prices: BTreeMap<String, String> =
            [("AAPL", "227.48"), ("GOOGL", "150.00")]
                .iter()
                .map(|(s, p)| (s.to_string(), p.to_string()))
                .collect();
        let msg = render_summary(&prices, Markup::Plain);
        assert!(msg.starts_with("📊 Daily Stock Report"));
        assert!(msg.contains("AAPL: 227.48\n"));
        assert!(msg.contains("GOOGL: 150.00\n"));

        let md = render_summary(&prices, Markup::MarkdownV2);
        assert!(md.contains("*AAPL*: 227\\.48"));
    }

    #[test]
    fn test_markdown_escapes_reserved_characters() {
        let prices = BTreeMap::from([("BRK_B".to_string(), "412.50".to_string())]);
        let md = render_summary(&prices, Markup::MarkdownV2);
        assert!(md.contains("*BRK\\_B*: 412\\.50\n"), "{md}");

        let plain = render_summary(&prices, Markup::Plain);
        assert!(plain.contains("BRK_B: 412.50\n"));

        let alerts = render_alerts(&[alert("BRK_B", 400.0, 380.0)], Markup::MarkdownV2);
        assert!(alerts.contains("*BRK\\_B*: 🔴 Decreased by *5\\.00%*"), "{alerts}");
        assert!(alerts.contains("Previous: $400\\.00 → Current: $380\\.00"));
    }

    #[test]
    fn test_render_alerts_direction_and_prices() {
        let msg = render_alerts(&[alert("GOOGL", 140.0, 150.0), alert("TSLA", 100.0, 94.0)], Markup::Plain);
        assert!(msg.contains("GOOGL: 🟢 Increased by 7.14%"));
        assert!(msg.contains("Previous: $140.00 → Current: $150.00"));
        assert!(msg.contains("TSLA: 🔴 Decreased by 6.00%"));
    }

    #[tokio::test]
    async fn test_log_channel_accepts_empty_batch() {
        assert!(LogNotifier.send_alerts(&[]).await.is_ok());
    }

    #[test]
    fn test_from_config_requires_credentials() {
        let mut cfg = NotifyConfig::default();
        assert!(from_config(&cfg).is_ok());

        cfg.channel = Channel::Telegram;
        assert!(from_config(&cfg).is_err());

        cfg.channel = Channel::Line;
        cfg.line_token = Some("secret".into());
        assert!(from_config(&cfg).is_ok());
    }
}

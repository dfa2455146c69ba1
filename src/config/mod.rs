use crate::source::cleaner::normalise_symbol;
use anyhow::{Context, Result, bail, ensure};
use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    #[serde(default)]
    pub source: SourceConfig,

    #[serde(default)]
    pub fetch: FetchConfig,

    #[serde(default)]
    pub alert: AlertConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub notify: NotifyConfig,
}

/// Quote page configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceConfig {
    /// Quote page URL, `{symbol}` is substituted per fetch.
    #[serde(default = "default_quote_url")]
    pub quote_url: String,

    #[serde(default = "default_price_selector")]
    pub price_selector: String,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Fetch cycle configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FetchConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Deadline for one attempt (page open + navigate + extract).
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,

    /// Total attempts per symbol, first one included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

/// Price-change alert configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AlertConfig {
    #[serde(default = "default_threshold_pct")]
    pub threshold_pct: f64,
}

/// Scheduler configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_minutes")]
    pub tick_minutes: u32,

    #[serde(default = "default_report_hour")]
    pub report_hour: u32,

    #[serde(default = "default_realtime_interval_minutes")]
    pub realtime_interval_minutes: u32,

    /// Offset of the scheduler's local time from UTC, in hours.
    #[serde(default = "default_utc_offset_hours")]
    pub utc_offset_hours: i32,

    /// Local-hour ranges `[start, end)` during which the market is open.
    #[serde(default = "default_market_hours")]
    pub market_hours: Vec<HourRange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct HourRange {
    pub start: u32,
    pub end: u32,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_true")]
    pub run_migrations: bool,

    #[serde(default = "default_storage_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Telegram,
    Line,
    Log,
}

/// Notification channel configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotifyConfig {
    #[serde(default = "default_channel")]
    pub channel: Channel,

    #[serde(default)]
    pub telegram_token: Option<String>,

    #[serde(default)]
    pub telegram_chat_id: Option<String>,

    #[serde(default)]
    pub line_token: Option<String>,

    #[serde(default = "default_notify_timeout_secs")]
    pub timeout_secs: u64,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_symbols() -> Vec<String> {
    ["AAPL", "GOOGL", "AMZN", "MSFT", "TSLA", "NVDA", "NFLX", "META"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_quote_url() -> String {
    "https://finance.yahoo.com/quote/{symbol}/".to_string()
}
fn default_price_selector() -> String {
    r#"span[data-testid="qsp-price"]"#.to_string()
}
fn default_user_agent() -> String {
    "Mozilla/5.0 AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36".to_string()
}
fn default_request_timeout_secs() -> u64 {
    60
}
fn default_concurrency() -> usize {
    5
}
fn default_attempt_timeout_secs() -> u64 {
    120
}
fn default_max_attempts() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    5000
}
fn default_threshold_pct() -> f64 {
    5.0
}
fn default_tick_minutes() -> u32 {
    15
}
fn default_report_hour() -> u32 {
    7
}
fn default_realtime_interval_minutes() -> u32 {
    30
}
fn default_utc_offset_hours() -> i32 {
    9
}
fn default_market_hours() -> Vec<HourRange> {
    vec![HourRange { start: 23, end: 24 }, HourRange { start: 0, end: 6 }]
}
fn default_db_path() -> PathBuf {
    PathBuf::from("data/stock_watch.duckdb")
}
fn default_true() -> bool {
    true
}
fn default_storage_timeout_secs() -> u64 {
    5
}
fn default_channel() -> Channel {
    Channel::Log
}
fn default_notify_timeout_secs() -> u64 {
    10
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            quote_url: default_quote_url(),
            price_selector: default_price_selector(),
            user_agent: default_user_agent(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self { threshold_pct: default_threshold_pct() }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_minutes: default_tick_minutes(),
            report_hour: default_report_hour(),
            realtime_interval_minutes: default_realtime_interval_minutes(),
            utc_offset_hours: default_utc_offset_hours(),
            market_hours: default_market_hours(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            run_migrations: true,
            timeout_secs: default_storage_timeout_secs(),
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            channel: default_channel(),
            telegram_token: None,
            telegram_chat_id: None,
            line_token: None,
            timeout_secs: default_notify_timeout_secs(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            source: SourceConfig::default(),
            fetch: FetchConfig::default(),
            alert: AlertConfig::default(),
            scheduler: SchedulerConfig::default(),
            storage: StorageConfig::default(),
            notify: NotifyConfig::default(),
        }
    }
}

// ── Accessors ────────────────────────────────────────────────────────────────

impl FetchConfig {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.tick_minutes) * 60)
    }

    pub fn offset(&self) -> Result<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_hours * 3600)
            .with_context(|| format!("utc_offset_hours {} out of range", self.utc_offset_hours))
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("STOCKWATCH").separator("__"))
            // Variable names used by earlier deployments
            .set_override_option("notify.telegram_token", std::env::var("TELEGRAM_BOT_TOKEN").ok())?
            .set_override_option("notify.telegram_chat_id", std::env::var("TELEGRAM_CHAT_ID").ok())?
            .set_override_option("notify.line_token", std::env::var("LINE_CHANNEL_ACCESS_TOKEN").ok())?
            .build()
            .context("Failed to read configuration")?;

        let mut app_cfg: AppConfig = cfg
            .try_deserialize()
            .context("Invalid configuration")?;
        app_cfg.symbols = app_cfg.symbols.iter().map(|s| normalise_symbol(s)).collect();
        app_cfg.validate()?;
        Ok(app_cfg)
    }

    /// Reject settings the runtime cannot work with.
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.symbols.is_empty(), "symbols must not be empty");
        ensure!(self.fetch.concurrency > 0, "fetch.concurrency must be at least 1");
        ensure!(self.fetch.max_attempts > 0, "fetch.max_attempts must be at least 1");
        ensure!(self.fetch.attempt_timeout_secs > 0, "fetch.attempt_timeout_secs must be positive");
        ensure!(self.alert.threshold_pct > 0.0, "alert.threshold_pct must be positive");
        ensure!(
            self.source.quote_url.contains("{symbol}"),
            "source.quote_url must contain a {{symbol}} placeholder"
        );
        scraper::Selector::parse(&self.source.price_selector).map_err(|e| {
            anyhow::anyhow!("source.price_selector {:?}: {:?}", self.source.price_selector, e)
        })?;

        let s = &self.scheduler;
        ensure!(s.tick_minutes > 0 && s.tick_minutes <= 60, "scheduler.tick_minutes must be 1..=60");
        ensure!(s.report_hour < 24, "scheduler.report_hour must be 0..=23");
        ensure!(
            s.realtime_interval_minutes > 0 && s.realtime_interval_minutes <= 60,
            "scheduler.realtime_interval_minutes must be 1..=60"
        );
        s.offset()?;
        for r in &s.market_hours {
            ensure!(r.start < r.end && r.end <= 24, "invalid market hour range {}..{}", r.start, r.end);
        }

        match self.notify.channel {
            Channel::Telegram => {
                if self.notify.telegram_token.as_deref().unwrap_or("").is_empty() {
                    bail!("notify.telegram_token (TELEGRAM_BOT_TOKEN) not set");
                }
                if self.notify.telegram_chat_id.as_deref().unwrap_or("").is_empty() {
                    bail!("notify.telegram_chat_id (TELEGRAM_CHAT_ID) not set");
                }
            }
            Channel::Line => {
                if self.notify.line_token.as_deref().unwrap_or("").is_empty() {
                    bail!("notify.line_token (LINE_CHANNEL_ACCESS_TOKEN) not set");
                }
            }
            Channel::Log => {}
        }
        Ok(())
    }
}

use crate::models::PriceSample;
use crate::source::cleaner::parse_price;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDateTime, Utc};
use duckdb::{Connection, params};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};

// ── Store trait ───────────────────────────────────────────────────────────────

/// Price history as seen by the alerting core.
#[async_trait]
pub trait PriceStore: Send + Sync {
    async fn insert(&self, sample: &PriceSample) -> Result<()>;

    /// Most recent closing price, `None` if the symbol has never closed.
    async fn latest_closing(&self, symbol: &str) -> Result<Option<f64>>;
}

// ── Schema ────────────────────────────────────────────────────────────────────

const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS price_samples (
    symbol       VARCHAR   NOT NULL,
    -- Verbatim quote text, e.g. '1,234.56'
    price        VARCHAR   NOT NULL,
    is_closing   BOOLEAN   NOT NULL DEFAULT FALSE,
    recorded_at  TIMESTAMP NOT NULL
);

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL
);
"#;

const INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_samples_symbol ON price_samples (symbol);
CREATE INDEX IF NOT EXISTS idx_samples_time   ON price_samples (recorded_at);
"#;

// ── Repository ────────────────────────────────────────────────────────────────

pub struct Repository {
    conn: Arc<Mutex<Connection>>,
    timeout: Duration,
}

impl Repository {
    pub fn open(path: &Path, timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open DuckDB at {:?}", path))?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)), timeout })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Arc::new(Mutex::new(Connection::open_in_memory()?)),
            timeout: Duration::from_secs(5),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        lock(&self.conn)
    }

    pub fn run_migrations(&self) -> Result<()> {
        info!("Running migrations…");
        let conn = self.lock()?;
        conn.execute_batch(DDL).context("DDL failed")?;
        conn.execute_batch(INDEXES).context("Index creation failed")?;
        conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, ?)",
            params![Utc::now().naive_utc()],
        )?;
        info!("Migrations done.");
        Ok(())
    }

    /// Runs a query on the blocking pool, bounded by the storage timeout.
    async fn with_conn<T, F>(&self, what: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let task = tokio::task::spawn_blocking(move || {
            let guard = lock(&conn)?;
            f(&guard)
        });
        tokio::time::timeout(self.timeout, task)
            .await
            .with_context(|| format!("{} timed out after {:?}", what, self.timeout))?
            .with_context(|| format!("{} task failed", what))?
    }

    // ── Samples ───────────────────────────────────────────────────────────────

    fn insert_sample(conn: &Connection, sample: &PriceSample) -> Result<()> {
        conn.execute(
            "INSERT INTO price_samples (symbol, price, is_closing, recorded_at) VALUES (?, ?, ?, ?)",
            params![sample.symbol, sample.price, sample.is_closing, sample.recorded_at],
        )
        .with_context(|| format!("insert sample {} {}", sample.symbol, sample.recorded_at))?;
        Ok(())
    }

    fn query_latest_closing(conn: &Connection, symbol: &str) -> Result<Option<f64>> {
        let mut stmt = conn.prepare(
            "SELECT price FROM price_samples
             WHERE symbol = ? AND is_closing
             ORDER BY recorded_at DESC
             LIMIT 1",
        )?;
        let mut rows = stmt.query(params![symbol])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        let raw: String = row.get(0)?;
        let price = parse_price(&raw)
            .ok_or_else(|| anyhow!("invalid stored price {:?} for {}", raw, symbol))?;
        Ok(Some(price))
    }

    /// Closing samples of the last `days` days, oldest first.
    pub fn price_history(&self, symbol: &str, days: i64) -> Result<Vec<PriceSample>> {
        let since = Utc::now().naive_utc() - ChronoDuration::days(days);
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT symbol, price, is_closing, recorded_at FROM price_samples
             WHERE symbol = ? AND is_closing AND recorded_at >= ?
             ORDER BY recorded_at ASC",
        )?;
        let samples = stmt
            .query_map(params![symbol, since], |r| {
                Ok(PriceSample {
                    symbol: r.get(0)?,
                    price: r.get(1)?,
                    is_closing: r.get(2)?,
                    recorded_at: r.get::<_, NaiveDateTime>(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(samples)
    }

    pub fn list_symbols(&self) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT DISTINCT symbol FROM price_samples ORDER BY symbol")?;
        let syms: Vec<String> = stmt
            .query_map([], |r| r.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(syms)
    }

    pub fn sample_count(&self) -> Result<i64> {
        let conn = self.lock()?;
        let mut s = conn.prepare("SELECT COUNT(*) FROM price_samples")?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    pub fn time_range(&self) -> Result<(Option<NaiveDateTime>, Option<NaiveDateTime>)> {
        let conn = self.lock()?;
        let mut s = conn.prepare("SELECT MIN(recorded_at), MAX(recorded_at) FROM price_samples")?;
        Ok(s.query_row([], |r| Ok((r.get(0)?, r.get(1)?)))?)
    }
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>> {
    conn.lock().map_err(|_| anyhow!("DuckDB connection lock poisoned"))
}

#[async_trait]
impl PriceStore for Repository {
    async fn insert(&self, sample: &PriceSample) -> Result<()> {
        let sample = sample.clone();
        debug!("Saving {}: {} (closing: {})", sample.symbol, sample.price, sample.is_closing);
        self.with_conn("insert", move |conn| Repository::insert_sample(conn, &sample))
            .await
    }

    async fn latest_closing(&self, symbol: &str) -> Result<Option<f64>> {
        let symbol = symbol.to_string();
        self.with_conn("latest_closing", move |conn| {
            Repository::query_latest_closing(conn, &symbol)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, day).unwrap().and_hms_opt(hour, 0, 0).unwrap()
    }

    fn sample(symbol: &str, price: &str, closing: bool, when: NaiveDateTime) -> PriceSample {
        PriceSample {
            symbol: symbol.into(),
            price: price.into(),
            recorded_at: when,
            is_closing: closing,
        }
    }

    fn repo() -> Repository {
        let repo = Repository::open_in_memory().unwrap();
        repo.run_migrations().unwrap();
        repo
    }

    #[tokio::test]
    async fn test_latest_closing_picks_newest_closing_sample() {
        let repo = repo();
        repo.insert(&sample("GOOGL", "130.00", true, at(2, 7))).await.unwrap();
        repo.insert(&sample("GOOGL", "140.00", true, at(3, 7))).await.unwrap();
        // intraday samples never become the baseline
        repo.insert(&sample("GOOGL", "150.00", false, at(3, 23))).await.unwrap();

        assert_eq!(repo.latest_closing("GOOGL").await.unwrap(), Some(140.0));
    }

    #[tokio::test]
    async fn test_latest_closing_missing_symbol() {
        let repo = repo();
        repo.insert(&sample("AAPL", "200.00", false, at(3, 23))).await.unwrap();
        assert_eq!(repo.latest_closing("AAPL").await.unwrap(), None);
        assert_eq!(repo.latest_closing("NFLX").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_latest_closing_parses_thousands() {
        let repo = repo();
        repo.insert(&sample("NVDA", "1,204.50", true, at(3, 7))).await.unwrap();
        assert_eq!(repo.latest_closing("NVDA").await.unwrap(), Some(1204.5));
    }

    #[tokio::test]
    async fn test_corrupt_stored_price_is_an_error() {
        let repo = repo();
        repo.insert(&sample("META", "n/a", true, at(3, 7))).await.unwrap();
        assert!(repo.latest_closing("META").await.is_err());
    }

    #[tokio::test]
    async fn test_history_and_stats() {
        let repo = repo();
        let now = Utc::now().naive_utc();
        repo.insert(&sample("AMZN", "180.00", true, now - ChronoDuration::days(30))).await.unwrap();
        repo.insert(&sample("AMZN", "185.00", true, now - ChronoDuration::days(2))).await.unwrap();
        repo.insert(&sample("AMZN", "186.00", true, now - ChronoDuration::days(1))).await.unwrap();
        repo.insert(&sample("AMZN", "190.00", false, now)).await.unwrap();
        repo.insert(&sample("TSLA", "250.00", true, now)).await.unwrap();

        let history = repo.price_history("AMZN", 7).unwrap();
        let prices: Vec<&str> = history.iter().map(|s| s.price.as_str()).collect();
        assert_eq!(prices, vec!["185.00", "186.00"]);

        assert_eq!(repo.sample_count().unwrap(), 5);
        assert_eq!(repo.list_symbols().unwrap(), vec!["AMZN", "TSLA"]);
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let repo = repo();
        repo.run_migrations().unwrap();
        assert_eq!(repo.sample_count().unwrap(), 0);
    }
}

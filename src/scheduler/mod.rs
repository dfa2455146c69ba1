//! Time-driven driver: daily closing report plus intraday sweeps.
//!
//! One sequential loop owns all state transitions. Each tick is classified
//! into a [`Tick`] first and only then acted on, so the decision logic can be
//! tested without running any I/O.

pub mod market;

use crate::alert::{AlertGate, PriceChangeEvaluator};
use crate::clock::Clock;
use crate::config::{AppConfig, FetchConfig, SchedulerConfig};
use crate::models::{PriceAlert, PriceBook, PriceSample};
use crate::notify::Notifier;
use crate::pipeline::fetch_all;
use crate::source::QuoteFetcher;
use crate::storage::PriceStore;
use crate::utils::{Timer, until_next_boundary};
use anyhow::{Result, ensure};
use chrono::{DateTime, FixedOffset, NaiveDate, Timelike};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use self::market::MarketHours;

/// Added to each tick delay so the clock reads past the boundary.
const BOUNDARY_SLACK: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Idle,
    DailyReportDue,
    RealtimeSweepDue,
}

/// Collaborators the scheduler drives.
pub struct Services {
    pub fetcher: Arc<dyn QuoteFetcher>,
    pub store: Arc<dyn PriceStore>,
    pub notifier: Arc<dyn Notifier>,
    pub market: Arc<dyn MarketHours>,
    pub clock: Arc<dyn Clock>,
}

pub struct Scheduler {
    symbols: Vec<String>,
    fetch: FetchConfig,
    config: SchedulerConfig,
    fetcher: Arc<dyn QuoteFetcher>,
    store: Arc<dyn PriceStore>,
    notifier: Arc<dyn Notifier>,
    market: Arc<dyn MarketHours>,
    clock: Arc<dyn Clock>,
    evaluator: Arc<PriceChangeEvaluator>,
    gate: Arc<AlertGate>,
    last_processed: Option<NaiveDate>,
}

impl Scheduler {
    pub fn new(config: &AppConfig, services: Services) -> Self {
        let evaluator = Arc::new(PriceChangeEvaluator::new(
            Arc::clone(&services.store),
            Arc::clone(&services.clock),
            config.alert.threshold_pct,
        ));
        let gate = Arc::new(AlertGate::new(Arc::clone(&services.clock)));
        Self {
            symbols: config.symbols.clone(),
            fetch: config.fetch.clone(),
            config: config.scheduler.clone(),
            fetcher: services.fetcher,
            store: services.store,
            notifier: services.notifier,
            market: services.market,
            clock: services.clock,
            evaluator,
            gate,
            last_processed: None,
        }
    }

    #[cfg(test)]
    pub fn gate(&self) -> &AlertGate {
        &self.gate
    }

    #[cfg(test)]
    pub fn last_processed(&self) -> Option<NaiveDate> {
        self.last_processed
    }

    /// Which transition, if any, is due at `now`. The daily report wins
    /// when both would fire.
    pub fn due(&self, now: DateTime<FixedOffset>) -> Tick {
        let today = now.date_naive();
        if now.hour() == self.config.report_hour
            && now.minute() < self.config.tick_minutes
            && self.last_processed != Some(today)
        {
            return Tick::DailyReportDue;
        }
        if self.market.is_open(now.naive_local())
            && now.minute() % self.config.realtime_interval_minutes == 0
        {
            return Tick::RealtimeSweepDue;
        }
        Tick::Idle
    }

    /// Classify the current time and run the matching transition.
    pub async fn tick(&mut self) -> Tick {
        let now = self.clock.now();
        let tick = self.due(now);
        debug!("Tick at {}: {:?}", now.format("%Y-%m-%d %H:%M"), tick);

        match tick {
            Tick::Idle => {}
            Tick::DailyReportDue => {
                if let Err(e) = self.daily_report(now.date_naive()).await {
                    warn!("Daily report skipped: {:#}", e);
                }
            }
            Tick::RealtimeSweepDue => {
                if let Err(e) = self.realtime_sweep().await {
                    warn!("Realtime sweep skipped: {:#}", e);
                }
            }
        }
        tick
    }

    /// One fetch cycle over the configured symbols. Fails when nothing came back.
    pub async fn fetch_cycle(&self) -> Result<PriceBook> {
        let book = fetch_all(
            Arc::clone(&self.fetcher),
            &self.symbols,
            self.fetch.concurrency,
            self.fetch.attempt_timeout(),
        )
        .await?;
        ensure!(book.success_count() > 0, "no symbol could be fetched");
        Ok(book)
    }

    /// Record closing prices, send the summary, and open a fresh alert day.
    ///
    /// `today` is marked processed even when the summary cannot be delivered,
    /// so a notifier outage does not cause a second report the same morning.
    pub async fn daily_report(&mut self, today: NaiveDate) -> Result<()> {
        let _t = Timer::start("Daily report");
        let book = self.fetch_cycle().await?;
        let recorded_at = self.clock.now().naive_utc();

        let prices = book.prices();
        for (symbol, price) in &prices {
            let sample = PriceSample {
                symbol: symbol.clone(),
                price: price.clone(),
                recorded_at,
                is_closing: true,
            };
            if let Err(e) = self.store.insert(&sample).await {
                error!("{}: failed to save closing price: {:#}", symbol, e);
            }
        }

        match self.notifier.send_summary(&prices).await {
            Ok(()) => info!("Daily summary sent ({} symbols)", prices.len()),
            Err(e) => error!("Daily summary not delivered: {:#}", e),
        }

        self.last_processed = Some(today);
        self.gate.reset_all().await;
        Ok(())
    }

    /// Evaluate every fetched symbol and send qualifying alerts as one batch.
    pub async fn realtime_sweep(&self) -> Result<Vec<PriceAlert>> {
        let _t = Timer::start("Realtime sweep");
        let book = self.fetch_cycle().await?;

        let mut set = JoinSet::new();
        for (symbol, price) in book.prices() {
            let gate = Arc::clone(&self.gate);
            let evaluator = Arc::clone(&self.evaluator);
            set.spawn(async move {
                if !gate.can_send(&symbol).await {
                    debug!("{}: already alerted today", symbol);
                    return None;
                }
                let alert = evaluator.evaluate(&symbol, &price).await?;
                gate.mark_sent(&symbol).await;
                Some(alert)
            });
        }

        let mut alerts = Vec::new();
        while let Some(res) = set.join_next().await {
            match res {
                Ok(Some(alert)) => alerts.push(alert),
                Ok(None) => {}
                Err(e) => error!("Evaluation task failed: {}", e),
            }
        }
        alerts.sort_by(|a, b| a.symbol.cmp(&b.symbol));

        if alerts.is_empty() {
            info!("No significant price changes");
            return Ok(alerts);
        }
        match self.notifier.send_alerts(&alerts).await {
            Ok(()) => info!("Sent {} price alerts", alerts.len()),
            Err(e) => error!("Price alerts not delivered: {:#}", e),
        }
        Ok(alerts)
    }

    /// Check once immediately, then on every tick boundary until `shutdown`
    /// resolves. A running transition always completes first.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) {
        let period = self.config.tick_interval();
        info!(
            "Scheduler started: {} symbols, tick every {:?}, report at {:02}:00",
            self.symbols.len(),
            period,
            self.config.report_hour
        );

        self.tick().await;

        tokio::pin!(shutdown);
        loop {
            // Recomputed every round: a long transition must not shift the grid
            let wait = until_next_boundary(self.clock.now(), period) + BOUNDARY_SLACK;
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(wait) => {}
            }
            self.tick().await;
        }
        info!("Scheduler stopped");
    }
}

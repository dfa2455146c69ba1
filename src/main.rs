mod alert;
mod clock;
mod config;
mod error;
mod models;
mod notify;
mod pipeline;
mod scheduler;
mod source;
mod storage;
mod utils;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use crate::clock::{Clock, SystemClock};
use crate::config::AppConfig;
use crate::models::PriceSample;
use crate::scheduler::market::TradingWindow;
use crate::scheduler::{Scheduler, Services};
use crate::source::{QuoteFetcher, QuoteSource};
use crate::source::cleaner::normalise_symbol;
use crate::storage::{PriceStore, Repository};

#[derive(Parser)]
#[command(name = "stock-watch", about = "Stock price watcher: daily report and price-change alerts", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler until SIGINT/SIGTERM
    Run,

    /// Fetch every configured symbol once and print the prices
    Fetch {
        /// Also save the fetched prices as closing prices
        #[arg(long)]
        store_closing: bool,
    },

    /// Send the daily report now
    Report,

    /// Show recent closing prices for a symbol
    History {
        symbol: String,

        #[arg(short, long, default_value_t = 7)]
        days: i64,
    },

    /// Show database statistics
    Stats,

    /// Apply schema migrations
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "stock_watch=info,warn",
        1 => "stock_watch=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(filter))
        .init();

    let config = AppConfig::load()?;

    match cli.command {
        Command::Run => {
            let repo = open_repository(&config)?;
            let source = Arc::new(QuoteSource::new(&config.source, &config.fetch));
            let scheduler = build_scheduler(&config, Arc::clone(&source), repo)?;

            scheduler.run(shutdown_signal()).await;
            source.shutdown().await;
        }

        Command::Fetch { store_closing } => {
            let _t = utils::Timer::start("Fetch cycle");
            let source = Arc::new(QuoteSource::new(&config.source, &config.fetch));
            let result = pipeline::fetch_all(
                Arc::clone(&source) as Arc<dyn QuoteFetcher>,
                &config.symbols,
                config.fetch.concurrency,
                config.fetch.attempt_timeout(),
            )
            .await;
            source.shutdown().await;
            let book = result?;

            for (symbol, outcome) in book.iter() {
                match outcome {
                    Ok(price) => println!("  {:<8} {}", symbol, price),
                    Err(e) => println!("  {:<8} ✗ {}", symbol, e),
                }
            }

            if store_closing {
                let repo = open_repository(&config)?;
                let recorded_at = chrono::Utc::now().naive_utc();
                for (symbol, price) in book.prices() {
                    let sample = PriceSample { symbol, price, recorded_at, is_closing: true };
                    if let Err(e) = repo.insert(&sample).await {
                        warn!("{}: {:#}", sample.symbol, e);
                    }
                }
                info!("Saved {} closing prices", book.success_count());
            }
        }

        Command::Report => {
            let repo = open_repository(&config)?;
            let source = Arc::new(QuoteSource::new(&config.source, &config.fetch));
            let mut scheduler = build_scheduler(&config, Arc::clone(&source), repo)?;

            let today = SystemClock::new(config.scheduler.offset()?).now().date_naive();
            let result = scheduler.daily_report(today).await;
            source.shutdown().await;
            result?;
        }

        Command::History { symbol, days } => {
            let symbol = normalise_symbol(&symbol);
            let repo = open_repository(&config)?;
            let samples = repo.price_history(&symbol, days)?;
            if samples.is_empty() {
                println!("No closing prices for {} in the last {} days.", symbol, days);
            } else {
                println!("{} closing prices ({} days):", symbol, days);
                for s in &samples {
                    println!("  {}  {}", s.recorded_at.format("%Y-%m-%d %H:%M"), s.price);
                }
            }
        }

        Command::Stats => {
            let repo = open_repository(&config)?;
            let samples = repo.sample_count()?;
            let symbols = repo.list_symbols()?;
            let (min, max) = repo.time_range().unwrap_or((None, None));
            println!("─────────────────────────────────");
            println!("  Stock Watch · Database Stats");
            println!("─────────────────────────────────");
            println!("  Symbols  : {}", utils::fmt_number(symbols.len() as i64));
            println!("  Samples  : {}", utils::fmt_number(samples));
            println!("  From     : {}", min.map(|d| d.to_string()).unwrap_or("-".into()));
            println!("  To       : {}", max.map(|d| d.to_string()).unwrap_or("-".into()));
            if !symbols.is_empty() {
                println!("  Tracked  : {}", symbols.join(", "));
            }
            println!("─────────────────────────────────");
        }

        Command::Migrate => {
            let path = &config.storage.db_path;
            Repository::open(path, Duration::from_secs(config.storage.timeout_secs))?.run_migrations()?;
            println!("Migrations applied.");
        }
    }

    Ok(())
}

fn open_repository(config: &AppConfig) -> Result<Arc<Repository>> {
    let repo = Repository::open(
        &config.storage.db_path,
        Duration::from_secs(config.storage.timeout_secs),
    )?;
    if config.storage.run_migrations {
        repo.run_migrations()?;
    }
    Ok(Arc::new(repo))
}

fn build_scheduler(
    config: &AppConfig,
    source: Arc<QuoteSource>,
    repo: Arc<Repository>,
) -> Result<Scheduler> {
    let notifier = notify::from_config(&config.notify).context("Notifier setup failed")?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new(config.scheduler.offset()?));
    let market = Arc::new(TradingWindow::new(config.scheduler.market_hours.clone()));

    Ok(Scheduler::new(
        config,
        Services { fetcher: source, store: repo, notifier, market, clock },
    ))
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
            (Ok(mut sigint), Ok(mut sigterm)) => {
                tokio::select! {
                    _ = sigint.recv() => info!("SIGINT received, shutting down"),
                    _ = sigterm.recv() => info!("SIGTERM received, shutting down"),
                }
            }
            _ => {
                warn!("Could not install signal handlers, falling back to Ctrl-C");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Ctrl-C received, shutting down");
    }
}

//! Fetch cycle orchestrator: one fetch per symbol, bounded concurrency.
//!
//! Every symbol gets its own task; a semaphore caps how many are inside the
//! quote source at once. The call is a barrier: it returns only after every
//! task has finished, with one outcome per symbol. A failing (or panicking)
//! symbol never cancels its siblings.

use crate::error::FetchError;
use crate::models::PriceBook;
use crate::source::QuoteFetcher;
use anyhow::{Context, Result, ensure};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

pub async fn fetch_all(
    fetcher: Arc<dyn QuoteFetcher>,
    symbols: &[String],
    concurrency: usize,
    deadline: Duration,
) -> Result<PriceBook> {
    let symbols: BTreeSet<&String> = symbols.iter().collect();
    ensure!(!symbols.is_empty(), "no symbols to fetch");
    ensure!(concurrency > 0, "concurrency limit must be at least 1");

    fetcher.prepare().await.context("Quote source unavailable")?;

    info!("Fetching {} symbols (concurrency {})", symbols.len(), concurrency);

    let sem = Arc::new(Semaphore::new(concurrency));
    let mut handles = Vec::with_capacity(symbols.len());

    for symbol in symbols.into_iter().cloned() {
        let fetcher = Arc::clone(&fetcher);
        let sem = Arc::clone(&sem);

        let handle = tokio::spawn({
            let symbol = symbol.clone();
            async move {
                let _permit = sem
                    .acquire_owned()
                    .await
                    .map_err(|e| FetchError::Aborted(e.to_string()))?;
                fetcher.fetch(&symbol, deadline).await
            }
        });

        handles.push((symbol, handle));
    }

    let mut book = PriceBook::default();
    for (symbol, handle) in handles {
        let outcome = match handle.await {
            Ok(Ok(price)) => {
                info!("{}: {}", symbol, price);
                Ok(price)
            }
            Ok(Err(e)) => {
                warn!("{}: {}", symbol, e);
                Err(e)
            }
            Err(e) => {
                error!("Task panic for {}: {}", symbol, e);
                Err(FetchError::Aborted(e.to_string()))
            }
        };
        book.insert(symbol, outcome);
    }

    info!(
        "Fetch cycle done: {} ok | {} failed",
        book.success_count(),
        book.failure_count()
    );
    Ok(book)
}

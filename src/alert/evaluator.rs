use crate::clock::Clock;
use crate::models::{PriceAlert, PriceSample};
use crate::source::cleaner::{parse_price, percent_change};
use crate::storage::PriceStore;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Decides whether a fresh quote moved far enough from the last close.
pub struct PriceChangeEvaluator {
    store: Arc<dyn PriceStore>,
    clock: Arc<dyn Clock>,
    threshold_pct: f64,
}

impl PriceChangeEvaluator {
    pub fn new(store: Arc<dyn PriceStore>, clock: Arc<dyn Clock>, threshold_pct: f64) -> Self {
        Self { store, clock, threshold_pct }
    }

    pub async fn evaluate(&self, symbol: &str, current: &str) -> Option<PriceAlert> {
        let Some(current_price) = parse_price(current) else {
            warn!("{}: unparseable price {:?}, skipping", symbol, current);
            return None;
        };

        let previous = match self.store.latest_closing(symbol).await {
            Ok(Some(p)) => p,
            Ok(None) => {
                debug!("{}: no closing price yet", symbol);
                return None;
            }
            Err(e) => {
                warn!("{}: closing price lookup failed: {:#}", symbol, e);
                return None;
            }
        };

        let Some(change) = percent_change(previous, current_price) else {
            debug!("{}: zero baseline, skipping", symbol);
            return None;
        };
        if change.abs() < self.threshold_pct {
            debug!("{}: {:+.2}% is below {}%", symbol, change, self.threshold_pct);
            return None;
        }

        info!("{}: {:.2} → {:.2} ({:+.2}%)", symbol, previous, current_price, change);

        let sample = PriceSample {
            symbol: symbol.to_string(),
            price: current.trim().to_string(),
            recorded_at: self.clock.now().naive_utc(),
            is_closing: false,
        };
        if let Err(e) = self.store.insert(&sample).await {
            warn!("{}: failed to save intraday price: {:#}", symbol, e);
        }

        Some(PriceAlert {
            symbol: symbol.to_string(),
            previous_price: previous,
            current_price,
            percent_change: change,
            triggered_at: self.clock.now(),
        })
    }
}

#[cfg(test)]
pub mod testing {
    use crate::models::PriceSample;
    use crate::storage::PriceStore;
    use anyhow::{Result, bail};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// In-memory store with switchable failures.
    #[derive(Default)]
    pub struct MemoryStore {
        pub closings: Mutex<HashMap<String, f64>>,
        pub inserted: Mutex<Vec<PriceSample>>,
        pub fail_inserts: AtomicBool,
        pub fail_lookups: AtomicBool,
    }

    impl MemoryStore {
        pub fn with_closings(closings: &[(&str, f64)]) -> Self {
            let store = Self::default();
            store
                .closings
                .lock()
                .unwrap()
                .extend(closings.iter().map(|(s, p)| (s.to_string(), *p)));
            store
        }
    }

    #[async_trait]
    impl PriceStore for MemoryStore {
        async fn insert(&self, sample: &PriceSample) -> Result<()> {
            if self.fail_inserts.load(Ordering::SeqCst) {
                bail!("disk full");
            }
            self.inserted.lock().unwrap().push(sample.clone());
            Ok(())
        }

        async fn latest_closing(&self, symbol: &str) -> Result<Option<f64>> {
            if self.fail_lookups.load(Ordering::SeqCst) {
                bail!("connection reset");
            }
            Ok(self.closings.lock().unwrap().get(symbol).copied())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MemoryStore;
    use super::*;
    use crate::clock::testing::ManualClock;
    use std::sync::atomic::Ordering;

    fn evaluator(store: Arc<MemoryStore>) -> PriceChangeEvaluator {
        let clock = Arc::new(ManualClock::at(9, (2026, 3, 4), (23, 30)));
        PriceChangeEvaluator::new(store, clock, 5.0)
    }

    #[tokio::test]
    async fn test_six_percent_rise_alerts() {
        let store = Arc::new(MemoryStore::with_closings(&[("AAPL", 100.0)]));
        let alert = evaluator(store.clone()).evaluate("AAPL", "106.00").await.unwrap();

        assert_eq!(alert.percent_change, 6.0);
        assert_eq!(alert.previous_price, 100.0);
        assert_eq!(alert.current_price, 106.0);
        assert!(alert.is_increase());

        let inserted = store.inserted.lock().unwrap();
        assert_eq!(inserted.len(), 1);
        assert!(!inserted[0].is_closing);
        assert_eq!(inserted[0].price, "106.00");
    }

    #[tokio::test]
    async fn test_below_threshold_is_silent() {
        let store = Arc::new(MemoryStore::with_closings(&[("AAPL", 100.0)]));
        assert!(evaluator(store.clone()).evaluate("AAPL", "104.00").await.is_none());
        assert!(store.inserted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_threshold_is_inclusive_and_signed() {
        let store = Arc::new(MemoryStore::with_closings(&[("TSLA", 100.0)]));
        let alert = evaluator(store).evaluate("TSLA", "95.00").await.unwrap();
        assert_eq!(alert.percent_change, -5.0);
        assert!(!alert.is_increase());
    }

    #[tokio::test]
    async fn test_no_baseline_no_alert() {
        let store = Arc::new(MemoryStore::with_closings(&[("ZERO", 0.0)]));
        let eval = evaluator(store);
        assert!(eval.evaluate("ZERO", "1000.00").await.is_none());
        assert!(eval.evaluate("NEW", "1000.00").await.is_none());
    }

    #[tokio::test]
    async fn test_bad_price_or_lookup_failure_no_alert() {
        let store = Arc::new(MemoryStore::with_closings(&[("AAPL", 100.0)]));
        let eval = evaluator(store.clone());
        assert!(eval.evaluate("AAPL", "N/A").await.is_none());

        store.fail_lookups.store(true, Ordering::SeqCst);
        assert!(eval.evaluate("AAPL", "200.00").await.is_none());
    }

    #[tokio::test]
    async fn test_insert_failure_keeps_alert() {
        let store = Arc::new(MemoryStore::with_closings(&[("GOOGL", 140.0)]));
        store.fail_inserts.store(true, Ordering::SeqCst);
        let alert = evaluator(store).evaluate("GOOGL", "150.00").await.unwrap();
        assert!((alert.percent_change - 7.142857).abs() < 1e-4);
    }
}

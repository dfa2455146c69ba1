use crate::error::FetchError;
use chrono::{DateTime, FixedOffset, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ── Price sample ──────────────────────────────────────────────────────────────

/// One persisted price observation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceSample {
    pub symbol: String,
    pub price: String,       // as shown on the quote page, e.g. "1,234.56"
    pub recorded_at: NaiveDateTime, // UTC
    pub is_closing: bool,
}

// ── Price alert ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceAlert {
    pub symbol: String,
    pub previous_price: f64,
    pub current_price: f64,
    pub percent_change: f64,
    pub triggered_at: DateTime<FixedOffset>,
}

impl PriceAlert {
    pub fn is_increase(&self) -> bool {
        self.percent_change > 0.0
    }
}

// ── Fetch cycle results ───────────────────────────────────────────────────────

pub type FetchOutcome = Result<String, FetchError>;

/// Outcome of one fetch cycle, keyed by symbol.
#[derive(Debug, Default)]
pub struct PriceBook {
    outcomes: BTreeMap<String, FetchOutcome>,
}

impl PriceBook {
    pub fn insert(&mut self, symbol: String, outcome: FetchOutcome) {
        self.outcomes.insert(symbol, outcome);
    }

    pub fn get(&self, symbol: &str) -> Option<&FetchOutcome> {
        self.outcomes.get(symbol)
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FetchOutcome)> {
        self.outcomes.iter()
    }

    /// Successfully fetched prices only; failed symbols are absent.
    pub fn prices(&self) -> BTreeMap<String, String> {
        self.outcomes
            .iter()
            .filter_map(|(s, o)| o.as_ref().ok().map(|p| (s.clone(), p.clone())))
            .collect()
    }

    pub fn success_count(&self) -> usize {
        self.outcomes.values().filter(|o| o.is_ok()).count()
    }

    pub fn failure_count(&self) -> usize {
        self.len() - self.success_count()
    }
}

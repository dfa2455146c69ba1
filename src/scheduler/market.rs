use crate::config::HourRange;
use chrono::{Datelike, NaiveDateTime, Timelike, Weekday};

/// Decides whether realtime sweeps should run at a given local time.
pub trait MarketHours: Send + Sync {
    fn is_open(&self, local: NaiveDateTime) -> bool;
}

/// Weekdays only, inside any of the configured `[start, end)` hour ranges.
///
/// A session that crosses midnight in local time is written as two ranges,
/// e.g. the US session seen from UTC+9 is `23..24` and `0..6`.
pub struct TradingWindow {
    ranges: Vec<HourRange>,
}

impl TradingWindow {
    pub fn new(ranges: Vec<HourRange>) -> Self {
        Self { ranges }
    }
}

impl MarketHours for TradingWindow {
    fn is_open(&self, local: NaiveDateTime) -> bool {
        if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }
        let hour = local.hour();
        self.ranges.iter().any(|r| hour >= r.start && hour < r.end)
    }
}

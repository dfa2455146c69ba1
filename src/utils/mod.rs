use chrono::{DateTime, FixedOffset, Timelike};
use std::time::{Duration, Instant};
use tracing::info;

/// Logs how long a scheduled transition took.
pub struct Timer {
    label: &'static str,
    start: Instant,
}

impl Timer {
    pub fn start(label: &'static str) -> Self {
        info!("⏱  Starting: {}", label);
        Self { label, start: Instant::now() }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        info!("⏱  Finished: {} (took {:.2?})", self.label, self.start.elapsed());
    }
}

/// Time left until the next wall-clock multiple of `period` since local
/// midnight. Exactly on a boundary, the next one is a full period away.
pub fn until_next_boundary(now: DateTime<FixedOffset>, period: Duration) -> Duration {
    let period_secs = period.as_secs().max(1);
    let since_midnight = u64::from(now.num_seconds_from_midnight());
    let into_period = Duration::new(since_midnight % period_secs, now.nanosecond() % 1_000_000_000);
    Duration::from_secs(period_secs) - into_period
}

/// Format a large integer with thousands separators.
pub fn fmt_number(n: i64) -> String {
    let s = n.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(s.len() + s.len() / 3 + 1);
    for (i, ch) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if n < 0 { format!("-{}", grouped) } else { grouped }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_fmt_number() {
        assert_eq!(fmt_number(1_234_567), "1,234,567");
        assert_eq!(fmt_number(0), "0");
        assert_eq!(fmt_number(-42_000), "-42,000");
        assert_eq!(fmt_number(999), "999");
    }

    #[test]
    fn test_until_next_boundary() {
        let tz = FixedOffset::east_opt(9 * 3600).unwrap();
        let quarter = Duration::from_secs(15 * 60);

        let now = tz.with_ymd_and_hms(2026, 3, 4, 10, 7, 30).unwrap();
        assert_eq!(until_next_boundary(now, quarter), Duration::from_secs(7 * 60 + 30));

        let now = tz.with_ymd_and_hms(2026, 3, 4, 10, 45, 0).unwrap();
        assert_eq!(until_next_boundary(now, quarter), quarter);

        let now = tz.with_ymd_and_hms(2026, 3, 4, 23, 59, 0).unwrap();
        assert_eq!(until_next_boundary(now, quarter), Duration::from_secs(60));
    }
}

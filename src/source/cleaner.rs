// ── Parsers ───────────────────────────────────────────────────────────────────

/// Parse price: strip everything except digits, dot, minus.
/// "$1,234.56" → 1234.56 | "610.00" → 610.0
pub fn parse_price(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() || s == "N/A" || s == "-" || s == "—" {
        return None;
    }
    let cleaned: String = s
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    cleaned.parse().ok().filter(|p: &f64| p.is_finite())
}

pub fn normalise_symbol(s: &str) -> String {
    s.trim().to_uppercase()
}

/// Signed percent change from `previous` to `current`.
/// `None` when there is no usable baseline.
pub fn percent_change(previous: f64, current: f64) -> Option<f64> {
    if previous == 0.0 || !previous.is_finite() {
        return None;
    }
    Some((current - previous) / previous * 100.0)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

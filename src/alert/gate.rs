use crate::clock::Clock;
use chrono::{DateTime, FixedOffset};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Remembers which symbols already alerted today.
///
/// Admission compares calendar dates in the clock's time zone, not a rolling
/// 24 hours: an alert at 23:50 does not block one at 00:10 the next day.
pub struct AlertGate {
    sent: RwLock<HashMap<String, DateTime<FixedOffset>>>,
    clock: Arc<dyn Clock>,
}

impl AlertGate {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { sent: RwLock::new(HashMap::new()), clock }
    }

    pub async fn can_send(&self, symbol: &str) -> bool {
        let today = self.clock.now().date_naive();
        match self.sent.read().await.get(symbol) {
            Some(last) => last.date_naive() != today,
            None => true,
        }
    }

    pub async fn mark_sent(&self, symbol: &str) {
        let now = self.clock.now();
        self.sent.write().await.insert(symbol.to_string(), now);
        debug!("{}: alert recorded at {}", symbol, now);
    }

    /// Swaps in an empty map; readers see either the old map or the new one.
    pub async fn reset_all(&self) {
        let mut sent = self.sent.write().await;
        let cleared = std::mem::take(&mut *sent);
        debug!("Alert gate reset ({} entries dropped)", cleared.len());
    }
}

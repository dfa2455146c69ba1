use std::time::Duration;
use thiserror::Error;

/// Failure of a single quote fetch, or of a whole retry budget.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("price element `{selector}` not found")]
    ElementNotFound { selector: String },

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("browsing session unavailable: {0}")]
    Session(String),

    #[error("fetch failed for {symbol} after {attempts} attempt(s): {source}")]
    Exhausted {
        symbol: String,
        attempts: u32,
        #[source]
        source: Box<FetchError>,
    },

    #[error("fetch task aborted: {0}")]
    Aborted(String),
}

impl FetchError {
    /// Transient failures worth another attempt within the budget.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::Timeout(_) | FetchError::ElementNotFound { .. } | FetchError::Navigation(_)
        )
    }
}

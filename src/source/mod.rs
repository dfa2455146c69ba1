pub mod cleaner;
pub mod parsers;
pub mod session;

use crate::config::{FetchConfig, SourceConfig};
use crate::error::FetchError;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::time::timeout;
use tokio_retry::RetryIf;
use tokio_retry::strategy::FixedInterval;
use tracing::{debug, info, warn};
use url::Url;

use self::session::{BrowsingSession, HttpLauncher, SessionLauncher};

// ── Source trait ──────────────────────────────────────────────────────────────

/// Swappable quote source abstraction.
#[async_trait]
pub trait QuoteFetcher: Send + Sync {
    /// Performs any lazy set-up eagerly, so callers can tell an unusable
    /// source apart from per-symbol failures.
    async fn prepare(&self) -> Result<(), FetchError> {
        Ok(())
    }

    /// Raw price text for `symbol`; `deadline` bounds each attempt.
    async fn fetch(&self, symbol: &str, deadline: Duration) -> Result<String, FetchError>;
}

// ── Quote page source ─────────────────────────────────────────────────────────

pub struct QuoteSource {
    launcher: Box<dyn SessionLauncher>,
    session: OnceCell<Arc<dyn BrowsingSession>>,
    shutdown_requested: AtomicBool,
    closed: AtomicBool,
    quote_url: String,
    selector: String,
    max_attempts: u32,
    retry_delay: Duration,
}

impl QuoteSource {
    pub fn new(source: &SourceConfig, fetch: &FetchConfig) -> Self {
        Self::with_launcher(Box::new(HttpLauncher::new(source)), source, fetch)
    }

    pub fn with_launcher(
        launcher: Box<dyn SessionLauncher>,
        source: &SourceConfig,
        fetch: &FetchConfig,
    ) -> Self {
        Self {
            launcher,
            session: OnceCell::new(),
            shutdown_requested: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            quote_url: source.quote_url.clone(),
            selector: source.price_selector.clone(),
            max_attempts: fetch.max_attempts.max(1),
            retry_delay: fetch.retry_delay(),
        }
    }

    /// Quote page URL for a symbol, e.g. AAPL → https://finance.yahoo.com/quote/AAPL/
    fn quote_url(&self, symbol: &str) -> Result<Url, FetchError> {
        let raw = self.quote_url.replace("{symbol}", symbol);
        Url::parse(&raw).map_err(|e| FetchError::Navigation(format!("bad quote URL {}: {}", raw, e)))
    }

    /// The shared session, launched by whichever caller gets here first.
    async fn session(&self) -> Result<Arc<dyn BrowsingSession>, FetchError> {
        if self.shutdown_requested.load(Ordering::Acquire) {
            return Err(FetchError::Session("shut down".into()));
        }

        let session = self
            .session
            .get_or_try_init(|| async {
                info!("Launching shared browsing session");
                self.launcher.launch().await
            })
            .await?;

        // Lost a race with shutdown() while launching
        if self.shutdown_requested.load(Ordering::Acquire) {
            self.close_once(session).await;
            return Err(FetchError::Session("shut down".into()));
        }

        Ok(Arc::clone(session))
    }

    async fn close_once(&self, session: &Arc<dyn BrowsingSession>) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            session.close().await;
        }
    }

    /// One attempt: open a page, load the quote, read the price, release the page.
    async fn fetch_once(&self, symbol: &str, deadline: Duration) -> Result<String, FetchError> {
        let url = self.quote_url(symbol)?;
        let session = self.session().await?;

        let attempt = async {
            let mut page = session.open_page().await?;
            page.navigate(url.as_str()).await?;
            page.text(&self.selector).await
            // page dropped here, or with this future if the deadline fires
        };

        match timeout(deadline, attempt).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(deadline)),
        }
    }

    /// Releases the shared session. Safe to call from several places; only the
    /// first call does anything.
    pub async fn shutdown(&self) {
        if self.shutdown_requested.swap(true, Ordering::AcqRel) {
            debug!("Quote source already shut down");
            return;
        }
        match self.session.get() {
            Some(session) => self.close_once(session).await,
            None => debug!("Browsing session was never launched"),
        }
    }
}

#[async_trait]
impl QuoteFetcher for QuoteSource {
    async fn prepare(&self) -> Result<(), FetchError> {
        self.session().await.map(|_| ())
    }

    async fn fetch(&self, symbol: &str, deadline: Duration) -> Result<String, FetchError> {
        let attempts = AtomicU32::new(0);
        let counter = &attempts;
        let strategy =
            FixedInterval::new(self.retry_delay).take(self.max_attempts.saturating_sub(1) as usize);

        let result = RetryIf::spawn(
            strategy,
            move || async move {
                let n = counter.fetch_add(1, Ordering::AcqRel) + 1;
                if n > 1 {
                    debug!("{}: retry attempt {}", symbol, n - 1);
                }
                self.fetch_once(symbol, deadline)
                    .await
                    .inspect_err(|e| warn!("{}: attempt {} failed: {}", symbol, n, e))
            },
            FetchError::is_retryable,
        )
        .await;

        let made = attempts.load(Ordering::Acquire);
        match result {
            Ok(price) => {
                debug!("{}: {} (attempts: {})", symbol, price, made);
                Ok(price)
            }
            Err(e) if !e.is_retryable() => Err(e),
            Err(e) => Err(FetchError::Exhausted {
                symbol: symbol.to_string(),
                attempts: made,
                source: Box::new(e),
            }),
        }
    }
}

#[cfg(test)]
pub mod testing {
    //! Scripted session used by the source and pipeline tests.

    use super::session::{BrowsingSession, Page, SessionLauncher};
    use crate::error::FetchError;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Debug, Clone)]
    pub enum Step {
        Price(String),
        Hang,
        Missing,
        NavFail,
    }

    pub struct ScriptedSession {
        script: Mutex<VecDeque<Step>>,
        fallback: Step,
        pub opened: AtomicUsize,
        pub live: Arc<AtomicUsize>,
        pub closes: AtomicUsize,
    }

    impl ScriptedSession {
        pub fn new(script: Vec<Step>, fallback: Step) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                fallback,
                opened: AtomicUsize::new(0),
                live: Arc::new(AtomicUsize::new(0)),
                closes: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl BrowsingSession for ScriptedSession {
        async fn open_page(&self) -> Result<Box<dyn Page>, FetchError> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            self.live.fetch_add(1, Ordering::SeqCst);
            let step = self.script.lock().unwrap().pop_front().unwrap_or_else(|| self.fallback.clone());
            Ok(Box::new(ScriptedPage { step, live: Arc::clone(&self.live) }))
        }

        async fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct ScriptedPage {
        step: Step,
        live: Arc<AtomicUsize>,
    }

    impl Drop for ScriptedPage {
        fn drop(&mut self) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Page for ScriptedPage {
        async fn navigate(&mut self, _url: &str) -> Result<(), FetchError> {
            match self.step {
                Step::Hang => {
                    let () = std::future::pending().await;
                    Ok(())
                }
                Step::NavFail => Err(FetchError::Navigation("connection reset".into())),
                _ => Ok(()),
            }
        }

        async fn text(&mut self, selector: &str) -> Result<String, FetchError> {
            match &self.step {
                Step::Price(p) => Ok(p.clone()),
                _ => Err(FetchError::ElementNotFound { selector: selector.to_string() }),
            }
        }
    }

    pub struct ScriptedLauncher {
        pub session: Arc<ScriptedSession>,
        pub launches: AtomicUsize,
        pub fail_next: AtomicBool,
    }

    impl ScriptedLauncher {
        pub fn new(session: Arc<ScriptedSession>) -> Self {
            Self { session, launches: AtomicUsize::new(0), fail_next: AtomicBool::new(false) }
        }
    }

    #[async_trait]
    impl SessionLauncher for Arc<ScriptedLauncher> {
        async fn launch(&self) -> Result<Arc<dyn BrowsingSession>, FetchError> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.launches.fetch_add(1, Ordering::SeqCst);
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(FetchError::Session("browser binary missing".into()));
            }
            Ok(Arc::clone(&self.session) as Arc<dyn BrowsingSession>)
        }
    }
}

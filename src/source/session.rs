//! Shared browsing session and the short-lived pages opened under it.
//!
//! The session is the expensive part (connection pool, cookie jar, TLS state)
//! and is created once per process. A [`Page`] is cheap and isolated: it owns
//! one loaded document and is released when dropped, whatever the exit path.

use crate::config::SourceConfig;
use crate::error::FetchError;
use crate::source::parsers::visible_text;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

// ── Traits ────────────────────────────────────────────────────────────────────

/// Creates the shared session on first use.
#[async_trait]
pub trait SessionLauncher: Send + Sync {
    async fn launch(&self) -> Result<Arc<dyn BrowsingSession>, FetchError>;
}

#[async_trait]
pub trait BrowsingSession: Send + Sync {
    /// Opens an isolated page bound to this session.
    async fn open_page(&self) -> Result<Box<dyn Page>, FetchError>;

    /// Tears the session down. Pages opened afterwards are refused.
    async fn close(&self);
}

/// A sub-session. Dropping it releases it.
#[async_trait]
pub trait Page: Send {
    async fn navigate(&mut self, url: &str) -> Result<(), FetchError>;

    /// Text of the first visible element matching `selector`.
    async fn text(&mut self, selector: &str) -> Result<String, FetchError>;
}

// ── HTTP implementation ───────────────────────────────────────────────────────

pub struct HttpLauncher {
    config: SourceConfig,
}

impl HttpLauncher {
    pub fn new(config: &SourceConfig) -> Self {
        Self { config: config.clone() }
    }
}

#[async_trait]
impl SessionLauncher for HttpLauncher {
    async fn launch(&self) -> Result<Arc<dyn BrowsingSession>, FetchError> {
        let timeout = Duration::from_secs(self.config.request_timeout_secs);
        let client = reqwest::Client::builder()
            .user_agent(&self.config.user_agent)
            .timeout(timeout)
            .gzip(true)
            // Quote pages set consent cookies on first visit
            .cookie_store(true)
            .build()
            .map_err(|e| FetchError::Session(format!("failed to build HTTP client: {}", e)))?;

        info!("Browsing session ready (user agent {:?})", self.config.user_agent);
        Ok(Arc::new(HttpSession {
            client,
            timeout,
            open_pages: Arc::new(AtomicUsize::new(0)),
            closed: AtomicBool::new(false),
        }))
    }
}

pub struct HttpSession {
    client: reqwest::Client,
    timeout: Duration,
    open_pages: Arc<AtomicUsize>,
    closed: AtomicBool,
}

#[async_trait]
impl BrowsingSession for HttpSession {
    async fn open_page(&self) -> Result<Box<dyn Page>, FetchError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(FetchError::Session("session closed".into()));
        }
        Ok(Box::new(HttpPage {
            client: self.client.clone(),
            timeout: self.timeout,
            document: None,
            _lease: PageLease::acquire(&self.open_pages),
        }))
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let open = self.open_pages.load(Ordering::Acquire);
        if open > 0 {
            warn!("Closing browsing session with {} page(s) still open", open);
        } else {
            info!("Browsing session closed");
        }
    }
}

struct HttpPage {
    client: reqwest::Client,
    timeout: Duration,
    document: Option<String>,
    _lease: PageLease,
}

impl HttpPage {
    fn request_error(&self, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout(self.timeout)
        } else {
            FetchError::Navigation(e.to_string())
        }
    }
}

#[async_trait]
impl Page for HttpPage {
    async fn navigate(&mut self, url: &str) -> Result<(), FetchError> {
        debug!("GET {}", url);
        let resp = self.client.get(url).send().await.map_err(|e| self.request_error(e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Navigation(format!("HTTP {} for {}", status, url)));
        }

        let body = resp.text().await.map_err(|e| self.request_error(e))?;
        self.document = Some(body);
        Ok(())
    }

    async fn text(&mut self, selector: &str) -> Result<String, FetchError> {
        let html = self
            .document
            .as_deref()
            .ok_or_else(|| FetchError::Navigation("no document loaded".into()))?;

        visible_text(html, selector).ok_or_else(|| FetchError::ElementNotFound {
            selector: selector.to_string(),
        })
    }
}

/// Counts a page as open until dropped.
struct PageLease(Arc<AtomicUsize>);

impl PageLease {
    fn acquire(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(counter))
    }
}

impl Drop for PageLease {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

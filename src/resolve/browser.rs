use super::{RequestExecutor, ResolveError, Resolved, check_response, direct::default_headers};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use std::time::Duration;
use tracing::debug;

/// Request mode used for an in-page fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Regular CORS fetch carrying the spoofed headers
    Cors,
    /// Opaque fetch without custom headers; status and URL may be hidden
    NoCors,
}

/// Response observed by a browser-side fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserResponse {
    /// URL after redirects, empty for opaque responses
    pub final_url: String,
    /// HTTP status, 0 for opaque responses
    pub status: u16,
    pub redirected: bool,
}

/// A live, cookie-bearing browser page able to run `fetch`.
///
/// The relay never launches or tears down the browser; the caller hands over
/// a ready context.
#[async_trait]
pub trait BrowserContext: Send + Sync {
    async fn fetch(
        &self,
        url: &str,
        mode: FetchMode,
        headers: &HeaderMap,
        timeout: Duration,
    ) -> Result<BrowserResponse, String>;
}

/// Resolves URLs from inside a browser context
pub struct BrowserRequestExecutor<C> {
    context: C,
    headers: HeaderMap,
}

impl<C: BrowserContext> BrowserRequestExecutor<C> {
    pub fn new(context: C) -> Self {
        Self {
            context,
            headers: default_headers(),
        }
    }

    pub fn with_headers(mut self, overrides: HeaderMap) -> Self {
        for (name, value) in &overrides {
            self.headers.insert(name.clone(), value.clone());
        }
        self
    }
}

#[async_trait]
impl<C: BrowserContext> RequestExecutor for BrowserRequestExecutor<C> {
    async fn resolve(&self, url: &str, timeout: Duration) -> Result<Resolved, ResolveError> {
        let response = match self
            .context
            .fetch(url, FetchMode::Cors, &self.headers, timeout)
            .await
        {
            Ok(response) => response,
            Err(cors_error) => {
                debug!("CORS fetch of {} failed ({}), trying no-cors", url, cors_error);
                self.context
                    .fetch(url, FetchMode::NoCors, &HeaderMap::new(), timeout)
                    .await
                    .map_err(ResolveError::Transport)?
            }
        };

        if response.status == 0 {
            return Err(ResolveError::MissingFinalUrl);
        }

        check_response(response.status, &response.final_url)
    }
}

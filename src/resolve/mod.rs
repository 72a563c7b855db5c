//! Single-URL resolution capabilities.
//!
//! An indirection URL is resolved by fetching it and keeping the final URL
//! after redirects. [`DirectHttpExecutor`] does this with a plain HTTP client;
//! [`BrowserRequestExecutor`] delegates to a live browser context supplied by
//! the caller. The rewriter only sees the [`RequestExecutor`] trait.

pub mod browser;
pub mod direct;
pub mod retry;
pub mod routing;

pub use browser::{BrowserContext, BrowserRequestExecutor, BrowserResponse, FetchMode};
pub use direct::{DirectHttpExecutor, parse_header_block};
pub use retry::{RetryConfig, resolve_with_retry};
pub use routing::RoutingExecutor;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// HTTP status signalling rate limiting.
pub const STATUS_TOO_MANY_REQUESTS: u16 = 429;

/// Successful resolution of one URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub final_url: String,
    pub status: u16,
}

/// Why a single resolution attempt failed
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("HTTP status {status}")]
    Status { status: u16 },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    /// Response carried no usable final URL (e.g. opaque browser response)
    #[error("response has no final URL")]
    MissingFinalUrl,

    #[error("cancelled")]
    Cancelled,
}

impl ResolveError {
    /// Rate limited by the remote host
    pub fn is_throttled(&self) -> bool {
        matches!(
            self,
            ResolveError::Status {
                status: STATUS_TOO_MANY_REQUESTS
            }
        )
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ResolveError::Status { status } => Some(*status),
            _ => None,
        }
    }
}

/// Resolves one indirection URL to its final URL
#[async_trait]
pub trait RequestExecutor: Send + Sync {
    /// Fetch `url` and return where it ended up.
    ///
    /// Implementations should honour `timeout`; callers also enforce it.
    async fn resolve(&self, url: &str, timeout: Duration) -> Result<Resolved, ResolveError>;
}

/// Outcome of resolving one candidate, retries included
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionResult {
    pub source: String,
    pub resolved: Option<String>,
    /// Last HTTP status observed, if any
    pub status: Option<u16>,
    pub error: Option<ResolveError>,
    /// Number of executor calls made
    pub attempts: u32,
}

impl ResolutionResult {
    pub fn success(&self) -> bool {
        self.resolved.is_some()
    }

    pub(crate) fn resolved(source: &str, resolved: Resolved, attempts: u32) -> Self {
        Self {
            source: source.to_string(),
            resolved: Some(resolved.final_url),
            status: Some(resolved.status),
            error: None,
            attempts,
        }
    }

    pub(crate) fn failed(source: &str, error: ResolveError, attempts: u32) -> Self {
        Self {
            source: source.to_string(),
            resolved: None,
            status: error.status(),
            error: Some(error),
            attempts,
        }
    }
}

/// Interpret a raw status and final URL the same way for every executor.
pub(crate) fn check_response(status: u16, final_url: &str) -> Result<Resolved, ResolveError> {
    if !(200..300).contains(&status) {
        return Err(ResolveError::Status { status });
    }
    if final_url.is_empty() {
        return Err(ResolveError::MissingFinalUrl);
    }
    Ok(Resolved {
        final_url: final_url.to_string(),
        status,
    })
}

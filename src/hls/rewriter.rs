//! Indirection URL rewriting.
//!
//! Playlist lines that are indirection URLs are resolved in sequential
//! batches with a global concurrency limit, then substituted in place.
//! Anything that fails to resolve is left untouched.

use crate::{
    hls::playlist::PlaylistLine,
    metrics,
    resolve::{RequestExecutor, ResolutionResult, RetryConfig, resolve_with_retry},
};
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::{
    sync::{Semaphore, mpsc::UnboundedSender},
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Host prefix of indirection URLs.
pub const DEFAULT_INDIRECTION_PREFIX: &str = "https://stream.googleapiscdn.com/";

/// Suffix of indirection URLs.
pub const DEFAULT_INDIRECTION_SUFFIX: &str = ".html";

/// Which trimmed lines count as indirection URLs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndirectionPattern {
    pub prefix: String,
    pub suffix: String,
}

impl Default for IndirectionPattern {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_INDIRECTION_PREFIX.to_string(),
            suffix: DEFAULT_INDIRECTION_SUFFIX.to_string(),
        }
    }
}

impl IndirectionPattern {
    /// Case-sensitive match of the whole (already trimmed) line
    pub fn matches(&self, candidate: &str) -> bool {
        candidate.starts_with(&self.prefix) && candidate.ends_with(&self.suffix)
    }
}

/// Tuning for [`PlaylistRewriter::rewrite`]
#[derive(Debug, Clone)]
pub struct RewriteOptions {
    /// Maximum resolutions in flight across the whole playlist
    pub concurrency_limit: usize,
    pub batch_size: usize,
    pub request_timeout: Duration,
    /// Pause between consecutive batches
    pub batch_delay: Duration,
    pub retry: RetryConfig,
}

impl Default for RewriteOptions {
    fn default() -> Self {
        Self {
            concurrency_limit: 8,
            batch_size: 10,
            request_timeout: Duration::from_secs(15),
            batch_delay: Duration::from_millis(500),
            retry: RetryConfig::default(),
        }
    }
}

/// Progress snapshot emitted after every completed resolution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RewriteProgress {
    pub processed: usize,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl RewriteProgress {
    /// Fraction complete in [0.0, 1.0].
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        (self.processed as f64 / self.total as f64).min(1.0)
    }
}

/// Per-invocation state shared by resolution tasks
#[derive(Debug, Default)]
struct Tally {
    mapping: HashMap<String, String>,
    progress: RewriteProgress,
}

/// Rewrites indirection URLs in playlist text through a [`RequestExecutor`]
#[derive(Clone)]
pub struct PlaylistRewriter {
    executor: Arc<dyn RequestExecutor>,
    options: RewriteOptions,
    pattern: IndirectionPattern,
    progress: Option<UnboundedSender<RewriteProgress>>,
}

impl PlaylistRewriter {
    pub fn new(executor: Arc<dyn RequestExecutor>) -> Self {
        Self {
            executor,
            options: RewriteOptions::default(),
            pattern: IndirectionPattern::default(),
            progress: None,
        }
    }

    pub fn with_options(mut self, options: RewriteOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_pattern(mut self, pattern: IndirectionPattern) -> Self {
        self.pattern = pattern;
        self
    }

    /// Send a [`RewriteProgress`] after each completed resolution.
    pub fn with_progress(mut self, sender: UnboundedSender<RewriteProgress>) -> Self {
        self.progress = Some(sender);
        self
    }

    /// Distinct indirection URLs in first-seen order
    pub fn candidates(&self, playlist: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        playlist
            .split('\n')
            .filter_map(|line| match PlaylistLine::classify(line) {
                PlaylistLine::Uri(uri) if self.pattern.matches(uri) => Some(uri),
                _ => None,
            })
            .filter(|uri| seen.insert(*uri))
            .map(str::to_string)
            .collect()
    }

    /// Resolve every indirection URL in `playlist` and substitute the results.
    ///
    /// Never fails: unresolved URLs keep their original line. When `cancel`
    /// fires, no further batches start, in-flight resolutions are abandoned
    /// and whatever was resolved so far is applied.
    pub async fn rewrite(&self, playlist: &str, cancel: &CancellationToken) -> String {
        let candidates = self.candidates(playlist);
        if candidates.is_empty() {
            info!("No indirection URLs found, playlist unchanged");
            return playlist.to_string();
        }

        let total = candidates.len();
        let batch_size = self.options.batch_size.max(1);
        let batch_count = total.div_ceil(batch_size);
        info!(
            "Resolving {} indirection URLs in {} batches (concurrency {})",
            total, batch_count, self.options.concurrency_limit
        );

        let limiter = Arc::new(Semaphore::new(self.options.concurrency_limit.max(1)));
        let tally = Arc::new(Mutex::new(Tally {
            mapping: HashMap::with_capacity(total),
            progress: RewriteProgress {
                total,
                ..Default::default()
            },
        }));

        for (index, batch) in candidates.chunks(batch_size).enumerate() {
            if cancel.is_cancelled() {
                warn!("Rewrite cancelled before batch {}/{}", index + 1, batch_count);
                break;
            }

            debug!("Processing batch {}/{} ({} URLs)", index + 1, batch_count, batch.len());
            self.run_batch(batch, &limiter, &tally, cancel).await;

            if index + 1 < batch_count {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        warn!("Rewrite cancelled after batch {}/{}", index + 1, batch_count);
                        break;
                    }
                    _ = tokio::time::sleep(self.options.batch_delay) => {}
                }
            }
        }

        let (mapping, progress) = {
            let mut guard = tally.lock().unwrap_or_else(|p| p.into_inner());
            (std::mem::take(&mut guard.mapping), guard.progress)
        };

        info!(
            "Replaced {}/{} indirection URLs ({} failed)",
            mapping.len(),
            total,
            progress.failed
        );

        substitute(playlist, &mapping)
    }

    async fn run_batch(
        &self,
        batch: &[String],
        limiter: &Arc<Semaphore>,
        tally: &Arc<Mutex<Tally>>,
        cancel: &CancellationToken,
    ) {
        let mut tasks = JoinSet::new();

        for url in batch {
            let url = url.clone();
            let executor = Arc::clone(&self.executor);
            let limiter = Arc::clone(limiter);
            let tally = Arc::clone(tally);
            let cancel = cancel.clone();
            let progress_tx = self.progress.clone();
            let timeout = self.options.request_timeout;
            let retry = self.options.retry.clone();

            tasks.spawn(async move {
                let permit = tokio::select! {
                    _ = cancel.cancelled() => return,
                    permit = limiter.acquire_owned() => permit,
                };
                let Ok(_permit) = permit else {
                    return;
                };

                let result =
                    resolve_with_retry(executor.as_ref(), &url, timeout, &retry, &cancel).await;

                if cancel.is_cancelled() && !result.success() {
                    return;
                }

                let snapshot = record(&tally, result);
                if let Some(tx) = progress_tx {
                    let _ = tx.send(snapshot);
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!("Resolution task failed: {}", e);
            }
        }
    }
}

/// Fold one result into the shared tally and return the new progress.
fn record(tally: &Mutex<Tally>, result: ResolutionResult) -> RewriteProgress {
    metrics::record_resolution(result.success());

    let mut guard = tally.lock().unwrap_or_else(|p| p.into_inner());
    guard.progress.processed += 1;
    match result.resolved {
        Some(resolved) => {
            guard.progress.succeeded += 1;
            guard.mapping.insert(result.source, resolved);
        }
        None => guard.progress.failed += 1,
    }

    let progress = guard.progress;
    debug!(
        "Progress: {}/{} ({:.1}%) | Success: {} | Errors: {}",
        progress.processed,
        progress.total,
        progress.fraction() * 100.0,
        progress.succeeded,
        progress.failed
    );
    progress
}

/// Replace every line whose trimmed value is a mapping key.
///
/// Lines are split on `\n`; a trailing `\r` stays with its line and is kept
/// after substitution so CRLF input stays CRLF.
pub fn substitute(playlist: &str, mapping: &HashMap<String, String>) -> String {
    if mapping.is_empty() {
        return playlist.to_string();
    }

    playlist
        .split('\n')
        .map(|line| match mapping.get(line.trim()) {
            Some(resolved) => {
                debug!("Replacing {} -> {}", line.trim(), resolved);
                if line.ends_with('\r') {
                    format!("{resolved}\r")
                } else {
                    resolved.clone()
                }
            }
            None => line.to_string(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

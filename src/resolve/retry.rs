//! Bounded retry loop around a [`RequestExecutor`].
//!
//! Rate-limited responses (429) back off exponentially; every other failure
//! waits a fixed delay. Both share one attempt counter.

use super::{RequestExecutor, ResolutionResult, ResolveError};
use crate::metrics;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Default delay before retrying a non-429 failure, in milliseconds.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// Default number of retries for 429 responses.
pub const DEFAULT_THROTTLE_RETRIES: u32 = 2;

/// Default base delay for 429 backoff, in milliseconds.
pub const DEFAULT_THROTTLE_BASE_MS: u64 = 2000;

/// Configuration for [`resolve_with_retry`].
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries allowed for failures other than 429.
    pub max_retries: u32,
    /// Fixed sleep before each of those retries.
    pub retry_delay: Duration,
    /// Retries allowed for 429 responses.
    pub throttle_retries: u32,
    /// 429 backoff is `throttle_base * 2^attempt`.
    pub throttle_base: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            throttle_retries: DEFAULT_THROTTLE_RETRIES,
            throttle_base: Duration::from_millis(DEFAULT_THROTTLE_BASE_MS),
        }
    }
}

impl RetryConfig {
    /// Delay before the next attempt, or `None` to give up.
    ///
    /// `attempt` is the zero-based index of the attempt that just failed.
    pub fn next_delay(&self, attempt: u32, error: &ResolveError) -> Option<Duration> {
        match error {
            ResolveError::Cancelled => None,
            e if e.is_throttled() => (attempt < self.throttle_retries)
                .then(|| self.throttle_base.saturating_mul(1u32 << attempt.min(16))),
            _ => (attempt < self.max_retries).then_some(self.retry_delay),
        }
    }
}

/// Resolve `url` through `executor`, retrying per `config`.
///
/// Each attempt is capped at `timeout`. Never fails: exhaustion or
/// cancellation yields an unresolved [`ResolutionResult`].
pub async fn resolve_with_retry(
    executor: &dyn RequestExecutor,
    url: &str,
    timeout: Duration,
    config: &RetryConfig,
    cancel: &CancellationToken,
) -> ResolutionResult {
    let mut attempt: u32 = 0;

    loop {
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ResolveError::Cancelled),
            result = tokio::time::timeout(timeout, executor.resolve(url, timeout)) => {
                result.unwrap_or(Err(ResolveError::Timeout(timeout)))
            }
        };

        let error = match outcome {
            Ok(resolved) => {
                debug!("Resolved {} -> {} (attempt {})", url, resolved.final_url, attempt + 1);
                return ResolutionResult::resolved(url, resolved, attempt + 1);
            }
            Err(e) => e,
        };

        let Some(delay) = config.next_delay(attempt, &error) else {
            if error != ResolveError::Cancelled {
                warn!("Giving up on {} after {} attempts: {}", url, attempt + 1, error);
            }
            return ResolutionResult::failed(url, error, attempt + 1);
        };

        let reason = if error.is_throttled() { "throttled" } else { "error" };
        metrics::record_retry(reason);
        warn!(
            "Resolving {} failed ({}), retrying in {}ms (attempt {})",
            url,
            error,
            delay.as_millis(),
            attempt + 1
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return ResolutionResult::failed(url, ResolveError::Cancelled, attempt + 1);
            }
            _ = tokio::time::sleep(delay) => {}
        }

        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::Resolved;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Replays a fixed script of outcomes and records when each call happened.
    struct Scripted {
        script: Mutex<Vec<Result<Resolved, ResolveError>>>,
        calls: Mutex<Vec<Instant>>,
    }

    impl Scripted {
        fn new(mut script: Vec<Result<Resolved, ResolveError>>) -> Self {
            script.reverse();
            Self {
                script: Mutex::new(script),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn call_times(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RequestExecutor for Scripted {
        async fn resolve(&self, _url: &str, _timeout: Duration) -> Result<Resolved, ResolveError> {
            self.calls.lock().unwrap().push(Instant::now());
            self.script
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(Err(ResolveError::Transport("script exhausted".into())))
        }
    }

    fn ok() -> Result<Resolved, ResolveError> {
        Ok(Resolved {
            final_url: "https://cdn.example.com/seg.ts".to_string(),
            status: 200,
        })
    }

    fn throttled() -> Result<Resolved, ResolveError> {
        Err(ResolveError::Status { status: 429 })
    }

    const TIMEOUT: Duration = Duration::from_secs(15);

    fn assert_close(actual: Duration, expected: Duration) {
        assert!(
            actual >= expected && actual < expected + Duration::from_millis(20),
            "expected ~{expected:?}, got {actual:?}"
        );
    }

    #[test]
    fn retry_config_defaults() {
        let cfg = RetryConfig::default();
        assert_eq!(cfg.max_retries, 2);
        assert_eq!(cfg.retry_delay, Duration::from_secs(1));
        assert_eq!(cfg.throttle_retries, 2);
        assert_eq!(cfg.throttle_base, Duration::from_secs(2));
    }

    #[test]
    fn throttle_delay_doubles() {
        let cfg = RetryConfig::default();
        let err = ResolveError::Status { status: 429 };
        assert_eq!(cfg.next_delay(0, &err), Some(Duration::from_secs(2)));
        assert_eq!(cfg.next_delay(1, &err), Some(Duration::from_secs(4)));
        assert_eq!(cfg.next_delay(2, &err), None);
    }

    #[test]
    fn other_errors_use_fixed_delay() {
        let cfg = RetryConfig::default();
        let err = ResolveError::Transport("reset".into());
        assert_eq!(cfg.next_delay(0, &err), Some(Duration::from_secs(1)));
        assert_eq!(cfg.next_delay(1, &err), Some(Duration::from_secs(1)));
        assert_eq!(cfg.next_delay(2, &err), None);
        assert_eq!(cfg.next_delay(0, &ResolveError::Cancelled), None);
    }

    #[tokio::test(start_paused = true)]
    async fn throttled_twice_then_succeeds_with_backoff() {
        let executor = Scripted::new(vec![throttled(), throttled(), ok()]);
        let cancel = CancellationToken::new();

        let result = resolve_with_retry(
            &executor,
            "https://x/a.html",
            TIMEOUT,
            &RetryConfig::default(),
            &cancel,
        )
        .await;

        assert!(result.success());
        assert_eq!(result.attempts, 3);

        let times = executor.call_times();
        assert_eq!(times.len(), 3);
        assert_close(times[1] - times[0], Duration::from_secs(2));
        assert_close(times[2] - times[1], Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_errors_exhaust_after_three_calls() {
        let executor = Scripted::new(vec![]);
        let cancel = CancellationToken::new();

        let result = resolve_with_retry(
            &executor,
            "https://x/a.html",
            TIMEOUT,
            &RetryConfig::default(),
            &cancel,
        )
        .await;

        assert!(!result.success());
        assert_eq!(result.attempts, 3);
        assert!(matches!(result.error, Some(ResolveError::Transport(_))));

        let times = executor.call_times();
        assert_close(times[1] - times[0], Duration::from_secs(1));
        assert_close(times[2] - times[1], Duration::from_secs(1));
    }

    struct Hangs;

    #[async_trait]
    impl RequestExecutor for Hangs {
        async fn resolve(&self, _url: &str, _timeout: Duration) -> Result<Resolved, ResolveError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_executor_times_out() {
        let cancel = CancellationToken::new();
        let config = RetryConfig {
            max_retries: 0,
            ..Default::default()
        };

        let result = resolve_with_retry(
            &Hangs,
            "https://x/a.html",
            Duration::from_secs(3),
            &config,
            &cancel,
        )
        .await;

        assert_eq!(result.error, Some(ResolveError::Timeout(Duration::from_secs(3))));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_in_flight_call() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let result = resolve_with_retry(
            &Hangs,
            "https://x/a.html",
            TIMEOUT,
            &RetryConfig::default(),
            &cancel,
        )
        .await;

        assert_eq!(result.error, Some(ResolveError::Cancelled));
        assert_eq!(result.attempts, 1);
    }
}

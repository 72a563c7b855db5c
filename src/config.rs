use crate::{
    error::{RelayError, Result},
    hls::RewriteOptions,
    resolve::RetryConfig,
    server::DEFAULT_PORT,
};
use std::{env, path::PathBuf, str::FromStr, time::Duration};

/// Relay configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Loopback port for the playlist server
    pub port: u16,
    /// Maximum resolutions in flight
    pub concurrency_limit: usize,
    pub batch_size: usize,
    pub request_timeout: Duration,
    /// Pause between resolution batches
    pub batch_delay: Duration,
    /// Retries for non-429 resolution failures
    pub retry_attempts: u32,
    /// Base64 secret overriding the built-in decryption key
    pub decrypt_key: Option<String>,
    /// File holding the encrypted payload; stdin when unset
    pub payload_file: Option<PathBuf>,
    /// Raw header block (`name: value` per line) applied to resolution requests
    pub headers: Option<String>,
    /// Port for the Prometheus exporter; disabled when unset
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        let rewrite = RewriteOptions::default();
        Self {
            port: DEFAULT_PORT,
            concurrency_limit: rewrite.concurrency_limit,
            batch_size: rewrite.batch_size,
            request_timeout: rewrite.request_timeout,
            batch_delay: rewrite.batch_delay,
            retry_attempts: rewrite.retry.max_retries,
            decrypt_key: None,
            payload_file: None,
            headers: None,
            metrics_port: None,
        }
    }
}

/// Parse an optional numeric variable, keeping `default` when unset
fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| RelayError::Config(format!("{name} has invalid value '{raw}'"))),
        Err(_) => Ok(default),
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let port = parse_var("RELAY_PORT", defaults.port)?;
        let concurrency_limit = parse_var("RELAY_CONCURRENCY", defaults.concurrency_limit)?;
        let batch_size = parse_var("RELAY_BATCH_SIZE", defaults.batch_size)?;

        if concurrency_limit == 0 {
            return Err(RelayError::Config("RELAY_CONCURRENCY must be at least 1".into()));
        }
        if batch_size == 0 {
            return Err(RelayError::Config("RELAY_BATCH_SIZE must be at least 1".into()));
        }

        let request_timeout = Duration::from_secs(parse_var(
            "RELAY_REQUEST_TIMEOUT_SECS",
            defaults.request_timeout.as_secs(),
        )?);
        if request_timeout.is_zero() {
            return Err(RelayError::Config(
                "RELAY_REQUEST_TIMEOUT_SECS must be at least 1".into(),
            ));
        }
        let batch_delay = Duration::from_millis(parse_var(
            "RELAY_BATCH_DELAY_MS",
            defaults.batch_delay.as_millis() as u64,
        )?);
        let retry_attempts = parse_var("RELAY_RETRY_ATTEMPTS", defaults.retry_attempts)?;

        let metrics_port = match non_empty_var("RELAY_METRICS_PORT") {
            Some(raw) => Some(raw.trim().parse().map_err(|_| {
                RelayError::Config(format!("RELAY_METRICS_PORT has invalid value '{raw}'"))
            })?),
            None => None,
        };

        Ok(Config {
            port,
            concurrency_limit,
            batch_size,
            request_timeout,
            batch_delay,
            retry_attempts,
            decrypt_key: non_empty_var("RELAY_DECRYPT_KEY"),
            payload_file: non_empty_var("RELAY_PAYLOAD_FILE").map(PathBuf::from),
            headers: non_empty_var("RELAY_HEADERS"),
            metrics_port,
        })
    }

    /// Rewriter tuning derived from this configuration
    pub fn rewrite_options(&self) -> RewriteOptions {
        RewriteOptions {
            concurrency_limit: self.concurrency_limit,
            batch_size: self.batch_size,
            request_timeout: self.request_timeout,
            batch_delay: self.batch_delay,
            retry: RetryConfig {
                max_retries: self.retry_attempts,
                ..RetryConfig::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Serialize all env-var tests to prevent races between parallel test threads.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const ALL_VARS: &[&str] = &[
        "RELAY_PORT",
        "RELAY_CONCURRENCY",
        "RELAY_BATCH_SIZE",
        "RELAY_REQUEST_TIMEOUT_SECS",
        "RELAY_BATCH_DELAY_MS",
        "RELAY_RETRY_ATTEMPTS",
        "RELAY_DECRYPT_KEY",
        "RELAY_PAYLOAD_FILE",
        "RELAY_HEADERS",
        "RELAY_METRICS_PORT",
    ];

    /// Clear every relay var, set `set`, run `f`, then restore original state.
    fn with_env(set: &[(&str, &str)], f: impl FnOnce()) {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());

        let saved: Vec<(&str, Option<String>)> =
            ALL_VARS.iter().map(|k| (*k, env::var(k).ok())).collect();

        for k in ALL_VARS {
            // SAFETY: serialized by ENV_LOCK; no other thread modifies env vars concurrently.
            unsafe { env::remove_var(k) };
        }
        for (k, v) in set {
            unsafe { env::set_var(k, v) };
        }

        f();

        for (k, old) in saved {
            match old {
                Some(v) => unsafe { env::set_var(k, v) },
                None => unsafe { env::remove_var(k) },
            }
        }
    }

    #[test]
    fn defaults_when_unset() {
        with_env(&[], || {
            let config = Config::from_env().expect("defaults should load");
            assert_eq!(config.port, 8000);
            assert_eq!(config.concurrency_limit, 8);
            assert_eq!(config.batch_size, 10);
            assert_eq!(config.request_timeout, Duration::from_secs(15));
            assert_eq!(config.batch_delay, Duration::from_millis(500));
            assert_eq!(config.retry_attempts, 2);
            assert!(config.decrypt_key.is_none());
            assert!(config.payload_file.is_none());
            assert!(config.metrics_port.is_none());
        });
    }

    #[test]
    fn overrides_are_parsed() {
        with_env(
            &[
                ("RELAY_PORT", "9100"),
                ("RELAY_CONCURRENCY", "3"),
                ("RELAY_BATCH_SIZE", "50"),
                ("RELAY_REQUEST_TIMEOUT_SECS", "5"),
                ("RELAY_BATCH_DELAY_MS", "0"),
                ("RELAY_DECRYPT_KEY", "c2VjcmV0"),
                ("RELAY_PAYLOAD_FILE", "/tmp/payload.txt"),
                ("RELAY_METRICS_PORT", "9090"),
            ],
            || {
                let config = Config::from_env().unwrap();
                assert_eq!(config.port, 9100);
                assert_eq!(config.concurrency_limit, 3);
                assert_eq!(config.batch_size, 50);
                assert_eq!(config.request_timeout, Duration::from_secs(5));
                assert_eq!(config.batch_delay, Duration::ZERO);
                assert_eq!(config.decrypt_key.as_deref(), Some("c2VjcmV0"));
                assert_eq!(config.payload_file, Some(PathBuf::from("/tmp/payload.txt")));
                assert_eq!(config.metrics_port, Some(9090));
            },
        );
    }

    #[test]
    fn invalid_number_is_rejected() {
        with_env(&[("RELAY_PORT", "eighty")], || {
            assert!(matches!(Config::from_env(), Err(RelayError::Config(_))));
        });
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        with_env(&[("RELAY_CONCURRENCY", "0")], || {
            assert!(Config::from_env().is_err());
        });
    }

    #[test]
    fn zero_request_timeout_is_rejected() {
        with_env(&[("RELAY_REQUEST_TIMEOUT_SECS", "0")], || {
            assert!(matches!(Config::from_env(), Err(RelayError::Config(_))));
        });
    }

    #[test]
    fn blank_key_counts_as_unset() {
        with_env(&[("RELAY_DECRYPT_KEY", "   ")], || {
            assert!(Config::from_env().unwrap().decrypt_key.is_none());
        });
    }

    #[test]
    fn rewrite_options_follow_config() {
        let config = Config {
            concurrency_limit: 4,
            retry_attempts: 5,
            ..Default::default()
        };
        let options = config.rewrite_options();
        assert_eq!(options.concurrency_limit, 4);
        assert_eq!(options.retry.max_retries, 5);
        assert_eq!(options.retry.throttle_retries, 2);
    }
}

use super::{RequestExecutor, ResolveError, Resolved, check_response};
use crate::error::{RelayError, Result};
use async_trait::async_trait;
use reqwest::{
    Client,
    header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderName, HeaderValue, ORIGIN, REFERER, USER_AGENT},
    redirect,
};
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_ACCEPT: &str = "*/*";
pub const DEFAULT_ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";
pub const DEFAULT_ORIGIN: &str = "https://animevietsub.show";
pub const DEFAULT_REFERER: &str = "https://animevietsub.show/";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Maximum redirects followed per resolution.
const MAX_REDIRECTS: usize = 10;

/// Browser-like headers sent with every resolution request
pub fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static(DEFAULT_ACCEPT));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static(DEFAULT_ACCEPT_LANGUAGE));
    headers.insert(ORIGIN, HeaderValue::from_static(DEFAULT_ORIGIN));
    headers.insert(REFERER, HeaderValue::from_static(DEFAULT_REFERER));
    headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));
    headers
}

/// Parse a raw header block, one `name: value` per line.
///
/// Blank lines are ignored; malformed lines are skipped with a warning.
pub fn parse_header_block(block: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();

    for line in block.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let Some((name, value)) = line.split_once(':') else {
            warn!("Ignoring header line without ':' separator: {}", line);
            continue;
        };

        match (
            HeaderName::from_bytes(name.trim().as_bytes()),
            HeaderValue::from_str(value.trim()),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!("Ignoring invalid header line: {}", line),
        }
    }

    headers
}

/// Resolves URLs with a plain HTTP GET, following redirects
#[derive(Clone, Debug)]
pub struct DirectHttpExecutor {
    client: Client,
    headers: HeaderMap,
}

impl DirectHttpExecutor {
    /// Create an executor with its own redirect-following client.
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .redirect(redirect::Policy::limited(MAX_REDIRECTS))
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| RelayError::Internal(format!("failed to create HTTP client: {e}")))?;

        Ok(Self::with_client(client))
    }

    /// Use an existing client; it must follow redirects for resolution to work.
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            headers: default_headers(),
        }
    }

    /// Override or add headers on top of the defaults.
    pub fn with_headers(mut self, overrides: HeaderMap) -> Self {
        for (name, value) in &overrides {
            self.headers.insert(name.clone(), value.clone());
        }
        self
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}

#[async_trait]
impl RequestExecutor for DirectHttpExecutor {
    async fn resolve(&self, url: &str, timeout: Duration) -> std::result::Result<Resolved, ResolveError> {
        let response = self
            .client
            .get(url)
            .headers(self.headers.clone())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ResolveError::Timeout(timeout)
                } else {
                    ResolveError::Transport(e.to_string())
                }
            })?;

        check_response(response.status().as_u16(), response.url().as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn header_block_parsing() {
        let headers = parse_header_block(
            "accept: */*\n\nreferer: https://site.example/\r\nbroken line\nbad header: \u{7f}\n",
        );
        assert_eq!(headers.len(), 2);
        assert_eq!(headers.get("accept").unwrap(), "*/*");
        assert_eq!(headers.get("referer").unwrap(), "https://site.example/");
    }

    #[test]
    fn overrides_replace_defaults() {
        let executor = DirectHttpExecutor::with_client(Client::new())
            .with_headers(parse_header_block("referer: https://other.example/\nx-extra: 1"));

        assert_eq!(executor.headers().get(REFERER).unwrap(), "https://other.example/");
        assert_eq!(executor.headers().get("x-extra").unwrap(), "1");
        assert_eq!(executor.headers().get(ORIGIN).unwrap(), DEFAULT_ORIGIN);
    }

    #[tokio::test]
    async fn follows_redirect_to_final_url() {
        let server = MockServer::start().await;
        let final_url = format!("{}/media/seg-1.ts", server.uri());

        Mock::given(method("GET"))
            .and(path("/v/seg-1.html"))
            .respond_with(ResponseTemplate::new(302).insert_header("location", final_url.as_str()))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/media/seg-1.ts"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let executor = DirectHttpExecutor::new().unwrap();
        let resolved = executor
            .resolve(&format!("{}/v/seg-1.html", server.uri()), TIMEOUT)
            .await
            .unwrap();

        assert_eq!(resolved.final_url, final_url);
        assert_eq!(resolved.status, 200);
    }

    #[tokio::test]
    async fn sends_spoofed_headers() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(header("origin", DEFAULT_ORIGIN))
            .and(header("referer", DEFAULT_REFERER))
            .and(header("user-agent", DEFAULT_USER_AGENT))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let executor = DirectHttpExecutor::new().unwrap();
        let result = executor.resolve(&format!("{}/a.html", server.uri()), TIMEOUT).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn too_many_requests_is_throttled() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let executor = DirectHttpExecutor::new().unwrap();
        let err = executor
            .resolve(&format!("{}/a.html", server.uri()), TIMEOUT)
            .await
            .unwrap_err();

        assert!(err.is_throttled());
    }

    #[tokio::test]
    async fn slow_response_times_out() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let executor = DirectHttpExecutor::new().unwrap();
        let timeout = Duration::from_millis(100);
        let err = executor
            .resolve(&format!("{}/a.html", server.uri()), timeout)
            .await
            .unwrap_err();

        assert_eq!(err, ResolveError::Timeout(timeout));
    }
}

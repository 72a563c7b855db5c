use super::{RequestExecutor, ResolveError, Resolved};
use async_trait::async_trait;
use std::{collections::HashMap, sync::Arc, time::Duration};
use url::Url;

/// Picks an executor per target host, falling back to a default
#[derive(Clone)]
pub struct RoutingExecutor {
    default: Arc<dyn RequestExecutor>,
    by_host: HashMap<String, Arc<dyn RequestExecutor>>,
}

impl RoutingExecutor {
    pub fn new(default: Arc<dyn RequestExecutor>) -> Self {
        Self {
            default,
            by_host: HashMap::new(),
        }
    }

    /// Route URLs whose host equals `host` (case-insensitive) to `executor`.
    pub fn route(mut self, host: &str, executor: Arc<dyn RequestExecutor>) -> Self {
        self.by_host.insert(host.to_ascii_lowercase(), executor);
        self
    }

    fn select(&self, url: &str) -> &Arc<dyn RequestExecutor> {
        Url::parse(url)
            .ok()
            .and_then(|parsed| parsed.host_str().map(str::to_ascii_lowercase))
            .and_then(|host| self.by_host.get(&host))
            .unwrap_or(&self.default)
    }
}

#[async_trait]
impl RequestExecutor for RoutingExecutor {
    async fn resolve(&self, url: &str, timeout: Duration) -> Result<Resolved, ResolveError> {
        self.select(url).resolve(url, timeout).await
    }
}

//! Prometheus counters.
//!
//! Recording is a no-op until the binary installs an exporter.

use crate::error::{RelayError, Result};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::{Ipv4Addr, SocketAddr};
use tracing::info;

/// Count one finished resolution (`resolved` or `unresolved`).
pub fn record_resolution(success: bool) {
    let outcome = if success { "resolved" } else { "unresolved" };
    counter!("relay_resolutions_total", "outcome" => outcome).increment(1);
}

/// Count one retry, labelled `throttled` or `error`.
pub fn record_retry(reason: &'static str) {
    counter!("relay_resolution_retries_total", "reason" => reason).increment(1);
}

/// Count one playlist server response.
pub fn record_request(status: u16) {
    counter!("relay_playlist_requests_total", "status" => status.to_string()).increment(1);
}

/// Install the Prometheus exporter on `127.0.0.1:<port>`.
///
/// Must be called from within a Tokio runtime.
pub fn install_exporter(port: u16) -> Result<()> {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| RelayError::Config(format!("failed to install metrics exporter: {e}")))?;

    info!("Metrics exporter listening on http://{}/metrics", addr);
    Ok(())
}

//! Loopback HTTP server exposing a single playlist.
//!
//! The downloader fetches `http://127.0.0.1:<port>/playlist.m3u8`; every other
//! path is a 404. The accept loop runs on its own Tokio task so `start` only
//! waits for the bind.

pub mod handlers;
pub mod state;

use crate::error::{RelayError, Result};
use axum::{Router, routing::get};
use state::PlaylistState;
use std::{
    net::{Ipv4Addr, SocketAddr},
    time::Duration,
};
use tokio::{net::TcpListener, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Path of the only served route.
pub const PLAYLIST_PATH: &str = "/playlist.m3u8";

/// Default listening port.
pub const DEFAULT_PORT: u16 = 8000;

/// How long `stop` waits for the accept loop before aborting it.
const STOP_TIMEOUT: Duration = Duration::from_secs(1);

/// Build the router serving `state`
pub fn build_router(state: PlaylistState) -> Router {
    Router::new()
        .route(PLAYLIST_PATH, get(handlers::playlist::serve_playlist))
        .fallback(handlers::playlist::not_found)
        .with_state(state)
}

struct Running {
    addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

/// Serves one playlist on `127.0.0.1` until stopped
#[derive(Default)]
pub struct EphemeralPlaylistServer {
    running: Option<Running>,
}

impl EphemeralPlaylistServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `127.0.0.1:port` and serve `content` in the background.
    ///
    /// Port 0 picks a free port; [`Self::base_url`] reports the real one.
    /// Calling `start` on a running server does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::ServerBind`] if the port cannot be bound.
    pub async fn start(&mut self, content: impl Into<String>, port: u16) -> Result<()> {
        if let Some(running) = &self.running {
            debug!("Playlist server already running on {}", running.addr);
            return Ok(());
        }

        let requested = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        let listener = TcpListener::bind(requested)
            .await
            .map_err(|source| RelayError::ServerBind {
                addr: requested,
                source,
            })?;
        let addr = listener
            .local_addr()
            .map_err(|source| RelayError::ServerBind {
                addr: requested,
                source,
            })?;

        let app = build_router(PlaylistState::new(content));
        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();

        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, app)
                .with_graceful_shutdown(async move { signal.cancelled().await });
            if let Err(e) = serve.await {
                error!("Playlist server error: {}", e);
            }
        });

        info!("Playlist server listening on http://{}", addr);
        self.running = Some(Running {
            addr,
            shutdown,
            task,
        });
        Ok(())
    }

    /// Stop serving. Safe to call repeatedly or before `start`.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        running.shutdown.cancel();
        let mut task = running.task;
        match tokio::time::timeout(STOP_TIMEOUT, &mut task).await {
            Ok(_) => info!("Playlist server on {} stopped", running.addr),
            Err(_) => {
                warn!(
                    "Playlist server on {} did not stop within {:?}, aborting",
                    running.addr, STOP_TIMEOUT
                );
                task.abort();
                let _ = task.await;
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|running| running.addr)
    }

    /// `http://127.0.0.1:<port>` while running
    pub fn base_url(&self) -> Option<String> {
        self.local_addr().map(|addr| format!("http://{}", addr))
    }

    /// Full URL of the served playlist while running
    pub fn playlist_url(&self) -> Option<String> {
        self.base_url().map(|base| format!("{}{}", base, PLAYLIST_PATH))
    }
}

impl Drop for EphemeralPlaylistServer {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.shutdown.cancel();
            running.task.abort();
        }
    }
}

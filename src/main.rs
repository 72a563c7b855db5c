use m3u8_relay::{
    config::Config,
    error::Result,
    hls::{self, PlaylistRewriter, RewriteProgress},
    metrics,
    resolve::{DirectHttpExecutor, parse_header_block},
    server::EphemeralPlaylistServer,
};
use std::sync::Arc;
use tokio::{io::AsyncReadExt, sync::mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting m3u8-relay");

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(config).await {
        error!("Relay failed: {}", e);
        std::process::exit(1);
    }
}

async fn read_payload(config: &Config) -> Result<String> {
    match &config.payload_file {
        Some(path) => {
            info!("Reading payload from {}", path.display());
            Ok(tokio::fs::read_to_string(path).await?)
        }
        None => {
            info!("Reading payload from stdin");
            let mut payload = String::new();
            tokio::io::stdin().read_to_string(&mut payload).await?;
            Ok(payload)
        }
    }
}

async fn run(config: Config) -> Result<()> {
    if let Some(port) = config.metrics_port {
        metrics::install_exporter(port)?;
    }

    let payload = read_payload(&config).await?;
    let playlist = hls::decrypt_playlist(&payload, config.decrypt_key.as_deref())?;
    info!("Decrypted playlist ({} bytes)", playlist.content.len());

    let mut executor = DirectHttpExecutor::new()?;
    if let Some(block) = &config.headers {
        executor = executor.with_headers(parse_header_block(block));
    }

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, shutting down");
            interrupt.cancel();
        }
    });

    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<RewriteProgress>();
    let reporter = tokio::spawn(async move {
        while let Some(progress) = progress_rx.recv().await {
            info!(
                "Resolved {}/{} ({:.0}%, {} failed)",
                progress.processed,
                progress.total,
                progress.fraction() * 100.0,
                progress.failed
            );
        }
    });

    let rewriter = PlaylistRewriter::new(Arc::new(executor))
        .with_options(config.rewrite_options())
        .with_progress(progress_tx);
    let rewritten = rewriter.rewrite(&playlist.content, &cancel).await;
    drop(rewriter);
    if let Err(e) = reporter.await {
        warn!("Progress reporter failed: {}", e);
    }

    if cancel.is_cancelled() {
        info!("Cancelled before serving");
        return Ok(());
    }

    let mut server = EphemeralPlaylistServer::new();
    server.start(rewritten, config.port).await?;
    if let Some(url) = server.playlist_url() {
        info!("Playlist ready at {}", url);
    }

    cancel.cancelled().await;
    server.stop().await;
    Ok(())
}

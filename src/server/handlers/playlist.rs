use crate::{hls::PLAYLIST_MIME_TYPE, metrics, server::state::PlaylistState};
use axum::{
    extract::State,
    http::{HeaderValue, StatusCode, Uri, header},
    response::IntoResponse,
};
use tracing::{debug, info};

/// Serve the playlist body with the HLS content type
pub async fn serve_playlist(State(state): State<PlaylistState>) -> impl IntoResponse {
    info!("Serving playlist ({} bytes)", state.content.len());
    metrics::record_request(200);

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(PLAYLIST_MIME_TYPE)),
            (header::CONTENT_LENGTH, HeaderValue::from(state.content.len())),
        ],
        state.content.to_string(),
    )
}

/// Every path other than the playlist
pub async fn not_found(uri: Uri) -> impl IntoResponse {
    debug!("No route for {}", uri.path());
    metrics::record_request(404);
    StatusCode::NOT_FOUND
}

use m3u8_rs::{Playlist, parse_playlist_res};
use std::fmt;
use tracing::debug;

/// What a playlist contains, for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistSummary {
    Master { variants: usize },
    Media { segments: usize, ended: bool },
}

impl fmt::Display for PlaylistSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaylistSummary::Master { variants } => {
                write!(f, "master playlist with {} variants", variants)
            }
            PlaylistSummary::Media { segments, ended } => write!(
                f,
                "media playlist with {} segments{}",
                segments,
                if *ended { " (VOD)" } else { "" }
            ),
        }
    }
}

/// Parse HLS playlist content and summarize it.
///
/// Best effort: the relay treats playlists as text, so a parse failure is
/// only logged and never rejects the content.
pub fn inspect(content: &str) -> Option<PlaylistSummary> {
    match parse_playlist_res(content.as_bytes()) {
        Ok(Playlist::MasterPlaylist(master)) => Some(PlaylistSummary::Master {
            variants: master.variants.len(),
        }),
        Ok(Playlist::MediaPlaylist(media)) => Some(PlaylistSummary::Media {
            segments: media.segments.len(),
            ended: media.end_list,
        }),
        Err(e) => {
            debug!("Playlist is not parseable as HLS: {:?}", e);
            None
        }
    }
}

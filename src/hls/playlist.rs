use crate::{
    cipher,
    error::{RelayError, Result},
    hls::parser,
};
use base64::{Engine, engine::general_purpose::STANDARD};
use tracing::{debug, info};

/// MIME type used for every served playlist.
pub const PLAYLIST_MIME_TYPE: &str = "application/vnd.apple.mpegurl";

const BYTERANGE_TAG: &str = "#EXT-X-BYTERANGE:";

/// Decrypted, normalized playlist ready to be rewritten or served
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedPlaylist {
    /// Playlist text with CRLF line endings and no `#EXT-X-BYTERANGE` lines
    pub content: String,
    pub mime_type: &'static str,
    /// Base64 of `content`, suitable for a data URI
    pub base64_content: String,
}

impl DecryptedPlaylist {
    fn new(content: String) -> Self {
        let base64_content = STANDARD.encode(content.as_bytes());
        Self {
            content,
            mime_type: PLAYLIST_MIME_TYPE,
            base64_content,
        }
    }

    /// `data:` URI embedding the playlist
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64_content)
    }
}

/// Classification of a single playlist line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistLine<'a> {
    /// `#EXT...` tag or `#` comment
    Directive(&'a str),
    /// Segment or playlist URI (trimmed)
    Uri(&'a str),
    Blank,
}

impl<'a> PlaylistLine<'a> {
    pub fn classify(line: &'a str) -> Self {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            PlaylistLine::Blank
        } else if trimmed.starts_with('#') {
            PlaylistLine::Directive(trimmed)
        } else {
            PlaylistLine::Uri(trimmed)
        }
    }
}

/// Decrypt `payload` and assemble a [`DecryptedPlaylist`].
///
/// # Errors
///
/// Propagates [`RelayError::Decryption`] and returns
/// [`RelayError::EmptyContent`] when decryption yields no text.
pub fn decrypt_playlist(payload: &str, key: Option<&str>) -> Result<DecryptedPlaylist> {
    let text = cipher::decrypt(payload, key)?;
    build_playlist(&text)
}

/// Strip `#EXT-X-BYTERANGE` lines and normalize line endings to CRLF.
pub fn build_playlist(decrypted: &str) -> Result<DecryptedPlaylist> {
    if decrypted.is_empty() {
        return Err(RelayError::EmptyContent);
    }

    let mut stripped = 0usize;
    let kept: Vec<&str> = decrypted
        .split('\n')
        .filter(|line| {
            let is_byterange = line.trim_start().starts_with(BYTERANGE_TAG);
            if is_byterange {
                stripped += 1;
            }
            !is_byterange
        })
        .collect();

    if stripped > 0 {
        debug!("Removed {} EXT-X-BYTERANGE lines", stripped);
    }

    let content = cipher::normalize_crlf(&kept.join("\n"));

    if let Some(summary) = parser::inspect(&content) {
        info!("Decrypted {}", summary);
    }

    Ok(DecryptedPlaylist::new(content))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byterange_lines_are_removed() {
        let text = "#EXTM3U\r\n#EXTINF:4.0,\r\n#EXT-X-BYTERANGE:1000@0\r\nseg.ts\r\n#EXT-X-BYTERANGE:500@1000\r\n";
        let playlist = build_playlist(text).unwrap();

        assert!(!playlist.content.contains("BYTERANGE"));
        assert_eq!(playlist.content, "#EXTM3U\r\n#EXTINF:4.0,\r\nseg.ts\r\n");
    }

    #[test]
    fn line_endings_are_crlf() {
        let playlist = build_playlist("#EXTM3U\nseg.ts\rother.ts").unwrap();
        assert_eq!(playlist.content, "#EXTM3U\r\nseg.ts\r\nother.ts");
    }

    #[test]
    fn empty_text_is_an_error() {
        assert!(matches!(build_playlist(""), Err(RelayError::EmptyContent)));
    }

    #[test]
    fn data_url_embeds_base64_content() {
        let playlist = build_playlist("#EXTM3U").unwrap();
        assert_eq!(playlist.mime_type, PLAYLIST_MIME_TYPE);
        assert_eq!(
            playlist.to_data_url(),
            format!("data:application/vnd.apple.mpegurl;base64,{}", STANDARD.encode("#EXTM3U"))
        );
    }

    #[test]
    fn classify_lines() {
        assert_eq!(PlaylistLine::classify("  "), PlaylistLine::Blank);
        assert_eq!(
            PlaylistLine::classify("#EXTINF:10,\r"),
            PlaylistLine::Directive("#EXTINF:10,")
        );
        assert_eq!(
            PlaylistLine::classify(" https://cdn.example.com/a.ts\r"),
            PlaylistLine::Uri("https://cdn.example.com/a.ts")
        );
    }
}

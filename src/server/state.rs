use std::sync::Arc;

/// State shared by the playlist handlers
#[derive(Clone, Debug)]
pub struct PlaylistState {
    /// Playlist body served verbatim
    pub content: Arc<str>,
}

impl PlaylistState {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: Arc::from(content.into()),
        }
    }
}

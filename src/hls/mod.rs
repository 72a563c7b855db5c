pub mod parser;
pub mod playlist;
pub mod rewriter;

pub use playlist::{DecryptedPlaylist, PLAYLIST_MIME_TYPE, PlaylistLine, build_playlist, decrypt_playlist};
pub use rewriter::{IndirectionPattern, PlaylistRewriter, RewriteOptions, RewriteProgress};

//! Error types for playlist resolution.

use thiserror::Error;

/// Errors that can occur while resolving or repairing a playlist.
#[derive(Debug, Error)]
pub enum PlaylistError {
    /// Manifest fetch returned a non-2xx status.
    #[error("Playlist fetch failed with status {status}: {url}")]
    Fetch { status: u16, url: String },

    /// Network-level fetch failure.
    #[error("Playlist request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The body is not an HLS playlist.
    #[error("Not an M3U8 playlist: {url}")]
    NotM3u8 { url: String },

    /// No segment survived extension filtering.
    #[error("No playable media segments in playlist")]
    NoPlayableMedia,

    /// A URI in the manifest could not be resolved against its base.
    #[error("Invalid URI in playlist: {0}")]
    InvalidUri(#[from] url::ParseError),
}

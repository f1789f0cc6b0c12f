//! Error types for the transcode driver.

use thiserror::Error;

use crate::fetcher::FetchError;
use crate::playlist::PlaylistError;

/// Errors from ffmpeg invocation and attempt orchestration.
#[derive(Debug, Error)]
pub enum TranscoderError {
    /// ffmpeg binary missing or not executable.
    #[error("ffmpeg not found at '{path}'")]
    NotFound { path: String },

    /// ffmpeg exited non-zero.
    #[error("ffmpeg failed{}: {stderr}", code.map(|c| format!(" with code {}", c)).unwrap_or_default())]
    ExitFailure { code: Option<i32>, stderr: String },

    /// ffmpeg rejected a conditional flag by name.
    #[error("ffmpeg does not support option '{option}'")]
    UnsupportedOption { option: String },

    /// Output missing, empty or shorter than the expected duration.
    #[error("Incomplete output: {reason}")]
    OutputIncomplete { reason: String },

    /// Subprocess ran past the configured limit.
    #[error("Transcode timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// Manifest resolution failed for this attempt.
    #[error(transparent)]
    Playlist(#[from] PlaylistError),

    /// Local segment download failed for this attempt.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The job was cancelled.
    #[error("Canceled")]
    Cancelled,
}

impl TranscoderError {
    /// Whether the driver may fall through to its next attempt mode.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TranscoderError::Cancelled)
    }
}

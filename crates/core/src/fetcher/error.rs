//! Error types for the segment fetcher.

use thiserror::Error;

/// Errors that abort the whole parallel-fetch stage.
#[derive(Debug, Error)]
pub enum FetchError {
    /// A resource kept failing after all retries.
    #[error("Failed to fetch {url} after {attempts} attempts: {reason}")]
    ResourceFailed {
        url: String,
        attempts: u32,
        reason: String,
    },

    /// Local file write failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The job was cancelled mid-fetch.
    #[error("Canceled")]
    Cancelled,
}

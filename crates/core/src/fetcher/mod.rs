//! Parallel segment download pool.
//!
//! For VOD playlists the transcoder can be pointed at a local manifest
//! instead of making one HTTP round-trip per segment: every segment,
//! key and init-map is downloaded up front with bounded concurrency
//! and the manifest is rewritten to local relative paths.

mod error;
mod pool;

pub use error::FetchError;
pub use pool::{FetchedPlaylist, ProgressFn, SegmentFetcher, LOCAL_MANIFEST_NAME};

use serde::{Deserialize, Serialize};

/// Configuration for the segment fetcher pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetcherConfig {
    /// Concurrent segment download workers.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Retries per resource after the first attempt.
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Minimum segment count below which the pool declines to engage.
    #[serde(default = "default_min_segments")]
    pub min_segments: usize,
    /// Linear backoff step in milliseconds (attempt × step).
    #[serde(default = "default_backoff_step_ms")]
    pub backoff_step_ms: u64,
    /// Minimum interval between progress callbacks in milliseconds.
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            retries: default_retries(),
            timeout_secs: default_timeout_secs(),
            min_segments: default_min_segments(),
            backoff_step_ms: default_backoff_step_ms(),
            progress_interval_ms: default_progress_interval_ms(),
        }
    }
}

fn default_concurrency() -> usize {
    8
}

fn default_retries() -> u32 {
    2
}

fn default_timeout_secs() -> u64 {
    25
}

fn default_min_segments() -> usize {
    6
}

fn default_backoff_step_ms() -> u64 {
    400
}

fn default_progress_interval_ms() -> u64 {
    800
}

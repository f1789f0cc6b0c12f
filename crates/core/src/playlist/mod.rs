//! HLS playlist resolution and repair.
//!
//! Takes a manifest URL and produces the single best playable media
//! playlist: follows master playlists down to the highest-bandwidth
//! variant that looks playable, classifies every line, and repairs
//! sources that disguise media segments behind image extensions.

mod error;
mod repair;
mod resolver;
mod types;

pub use error::PlaylistError;
pub use repair::{looks_like_media, ProbeOutcome};
pub use resolver::PlaylistResolver;
pub use types::{LineRole, MediaPlaylist, ResourceRef, Variant, NON_MEDIA_EXTENSIONS};

use serde::{Deserialize, Serialize};

/// Configuration for playlist resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Maximum master-playlist recursion depth.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Maximum distinct segment URLs to byte-probe during repair.
    #[serde(default = "default_probe_sample")]
    pub probe_sample: usize,
    /// Extension substitutions tried, in order, when probing fails.
    #[serde(default = "default_fallback_extensions")]
    pub fallback_extensions: Vec<String>,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            probe_sample: default_probe_sample(),
            fallback_extensions: default_fallback_extensions(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_max_depth() -> usize {
    3
}

fn default_probe_sample() -> usize {
    5
}

fn default_fallback_extensions() -> Vec<String> {
    vec![".ts".to_string(), ".m4s".to_string(), ".mp4".to_string()]
}

fn default_timeout_secs() -> u64 {
    25
}

//! Transcoder configuration.

use serde::{Deserialize, Serialize};

/// Configuration for ffmpeg invocation and attempt orchestration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscoderConfig {
    /// Path to the ffmpeg binary.
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,

    /// Hard wall-clock limit for one ffmpeg run.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Minimum fraction of the expected duration the output must
    /// reach before a successful exit counts as complete.
    #[serde(default = "default_completeness_threshold")]
    pub completeness_threshold: f64,

    /// Maximum flag-group removals after "Unrecognized option" errors.
    #[serde(default = "default_narrowing_retries")]
    pub narrowing_retries: u32,

    /// Try the proxy gateway before direct fetching for HLS sources.
    #[serde(default)]
    pub prefer_proxy: bool,

    /// Base URL the gateway is reachable at from ffmpeg's side.
    #[serde(default = "default_proxy_base_url")]
    pub proxy_base_url: String,
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            timeout_secs: default_timeout_secs(),
            completeness_threshold: default_completeness_threshold(),
            narrowing_retries: default_narrowing_retries(),
            prefer_proxy: false,
            proxy_base_url: default_proxy_base_url(),
        }
    }
}

fn default_ffmpeg_path() -> String {
    std::env::var("FFMPEG_PATH").unwrap_or_else(|_| "ffmpeg".to_string())
}

fn default_timeout_secs() -> u64 {
    2 * 3600
}

fn default_completeness_threshold() -> f64 {
    0.9
}

fn default_narrowing_retries() -> u32 {
    3
}

fn default_proxy_base_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

//! Bounded-concurrency download pool implementation.

use reqwest::Client;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::headers::ForwardHeaders;
use crate::playlist::MediaPlaylist;

use super::{FetchError, FetcherConfig};

/// Filename of the rewritten manifest inside the job temp directory.
pub const LOCAL_MANIFEST_NAME: &str = "media.m3u8";

/// Progress callback, called with the completed fraction in percent.
pub type ProgressFn = Arc<dyn Fn(f32) + Send + Sync>;

/// Result of a successful pool run.
#[derive(Debug, Clone)]
pub struct FetchedPlaylist {
    /// Path of the locally rewritten manifest.
    pub manifest_path: PathBuf,
    pub segment_count: usize,
}

/// Downloads every resource of a VOD playlist into a temp directory.
pub struct SegmentFetcher {
    client: Client,
    config: FetcherConfig,
}

impl SegmentFetcher {
    pub fn new(config: FetcherConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("Failed to create HTTP client");
        Self { client, config }
    }

    pub fn with_client(client: Client, config: FetcherConfig) -> Self {
        Self { client, config }
    }

    /// Whether the pool can engage for this playlist at all.
    ///
    /// Live playlists, tiny playlists, byte-range or low-latency
    /// layouts and DRM key formats are all left to direct manifest
    /// playback.
    pub fn eligible(&self, playlist: &MediaPlaylist) -> bool {
        playlist.endlist
            && playlist.segments.len() >= self.config.min_segments
            && !playlist.has_byte_range
            && !playlist.has_partial_segments
            && !playlist.non_identity_keyformat
    }

    /// Download everything and write the rewritten manifest.
    ///
    /// Returns `Ok(None)` when the playlist is ineligible; the caller
    /// falls back to direct manifest playback. Any resource failing
    /// after all retries aborts the whole run.
    pub async fn fetch_all(
        &self,
        playlist: &MediaPlaylist,
        temp_dir: &Path,
        headers: &ForwardHeaders,
        cancel: &CancellationToken,
        progress: Option<ProgressFn>,
    ) -> Result<Option<FetchedPlaylist>, FetchError> {
        if !self.eligible(playlist) {
            debug!(url = %playlist.url, "Playlist ineligible for local segment download");
            return Ok(None);
        }

        tokio::fs::create_dir_all(temp_dir).await?;

        // Workers share a child token so a failed worker can stop its
        // siblings without cancelling the job token handed in.
        let pool_cancel = cancel.child_token();

        // Keys and init-maps first: small, required before any segment
        // can be decoded, and deduplicated by URL.
        let mut aux: Vec<(Url, String)> = Vec::new();
        for r in playlist.keys.iter().chain(playlist.maps.iter()) {
            if !aux.iter().any(|(u, _)| u == &r.url) {
                aux.push((r.url.clone(), r.local_name.clone()));
            }
        }
        for (url, local_name) in &aux {
            if pool_cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            self.download_one(url, &temp_dir.join(local_name), headers, &pool_cancel)
                .await?;
        }

        // Distinct segment URLs in playlist order.
        let mut segments: Vec<(Url, String)> = Vec::new();
        for s in &playlist.segments {
            if !segments.iter().any(|(u, _)| u == &s.url) {
                segments.push((s.url.clone(), s.local_name.clone()));
            }
        }

        let total = segments.len();
        let segments = Arc::new(segments);
        let next_index = Arc::new(AtomicUsize::new(0));
        let completed = Arc::new(AtomicUsize::new(0));
        let last_emit = Arc::new(Mutex::new(
            Instant::now() - Duration::from_millis(self.config.progress_interval_ms),
        ));

        let workers = self.config.concurrency.min(total).max(1);
        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let fetcher = self.clone_parts();
            let segments = Arc::clone(&segments);
            let next_index = Arc::clone(&next_index);
            let completed = Arc::clone(&completed);
            let last_emit = Arc::clone(&last_emit);
            let progress = progress.clone();
            let headers = headers.clone();
            let cancel = pool_cancel.clone();
            let temp_dir = temp_dir.to_path_buf();
            let interval = Duration::from_millis(self.config.progress_interval_ms);

            handles.push(tokio::spawn(async move {
                loop {
                    // Claim is the cancellation boundary: no new work is
                    // taken once the token flips.
                    if cancel.is_cancelled() {
                        return Err(FetchError::Cancelled);
                    }
                    let index = next_index.fetch_add(1, Ordering::SeqCst);
                    if index >= segments.len() {
                        return Ok(());
                    }

                    let (url, local_name) = &segments[index];
                    fetcher
                        .download_one(url, &temp_dir.join(local_name), &headers, &cancel)
                        .await?;

                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    if let Some(ref progress) = progress {
                        let mut last = last_emit.lock().await;
                        if last.elapsed() >= interval || done == segments.len() {
                            *last = Instant::now();
                            // Transcoding still follows, never report 100.
                            let pct = (done as f32 / segments.len() as f32 * 100.0).min(99.0);
                            progress(pct);
                        }
                    }
                }
            }));
        }

        for handle in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    pool_cancel.cancel();
                    return Err(e);
                }
                Err(e) => {
                    pool_cancel.cancel();
                    return Err(FetchError::ResourceFailed {
                        url: playlist.url.to_string(),
                        attempts: 0,
                        reason: format!("worker panicked: {}", e),
                    });
                }
            }
        }

        // Rewrite every classified line to its local relative path.
        let mut replace: HashMap<usize, String> = HashMap::new();
        for r in playlist
            .segments
            .iter()
            .chain(playlist.keys.iter())
            .chain(playlist.maps.iter())
        {
            replace.insert(r.line_index, r.local_name.clone());
        }
        let manifest = playlist.render(&replace, &[]);
        let manifest_path = temp_dir.join(LOCAL_MANIFEST_NAME);
        tokio::fs::write(&manifest_path, manifest).await?;

        debug!(
            url = %playlist.url,
            segments = total,
            "Local segment download complete"
        );

        Ok(Some(FetchedPlaylist {
            manifest_path,
            segment_count: total,
        }))
    }

    fn clone_parts(&self) -> SegmentFetcher {
        SegmentFetcher {
            client: self.client.clone(),
            config: self.config.clone(),
        }
    }

    /// Download one resource with retry and linear backoff.
    async fn download_one(
        &self,
        url: &Url,
        dest: &Path,
        headers: &ForwardHeaders,
        cancel: &CancellationToken,
    ) -> Result<(), FetchError> {
        let attempts = self.config.retries + 1;
        let mut last_reason = String::new();

        for attempt in 1..=attempts {
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }

            let request = headers.apply(self.client.get(url.clone()));
            let outcome = tokio::select! {
                r = Self::fetch_bytes(request) => r,
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            };

            match outcome {
                Ok(bytes) => {
                    tokio::fs::write(dest, &bytes).await?;
                    return Ok(());
                }
                Err(reason) => {
                    warn!(url = %url, attempt, reason = %reason, "Segment fetch attempt failed");
                    last_reason = reason;
                }
            }

            if attempt < attempts {
                let backoff = Duration::from_millis(self.config.backoff_step_ms * attempt as u64);
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                }
            }
        }

        Err(FetchError::ResourceFailed {
            url: url.to_string(),
            attempts,
            reason: last_reason,
        })
    }

    async fn fetch_bytes(request: reqwest::RequestBuilder) -> Result<Vec<u8>, String> {
        let resp = request.send().await.map_err(|e| e.to_string())?;
        if !resp.status().is_success() {
            return Err(format!("status {}", resp.status()));
        }
        resp.bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| e.to_string())
    }
}

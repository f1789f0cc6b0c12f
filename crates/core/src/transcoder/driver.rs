//! Per-job attempt orchestration.
//!
//! One driver run owns the whole path from source URL to validated
//! MP4: resolve the manifest, download segments locally when the
//! playlist allows it, otherwise transcode from a temp manifest,
//! optionally rewritten through the proxy gateway. HLS sources get a
//! direct attempt and a proxy attempt; plain files get one attempt.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use url::Url;

use crate::fetcher::{FetchError, SegmentFetcher};
use crate::headers::ForwardHeaders;
use crate::playlist::{MediaPlaylist, PlaylistResolver};
use crate::proxy::{ProxyContext, ProxyTokenStore};

use super::args::TranscodeArgs;
use super::config::TranscoderConfig;
use super::error::TranscoderError;
use super::ffmpeg::{FfmpegRunner, TranscodeProgress};

/// Manifest filename used for non-local transcode attempts.
const REMOTE_MANIFEST_NAME: &str = "remote.m3u8";

/// One download request as seen by the driver.
#[derive(Debug, Clone)]
pub struct DriveRequest {
    pub url: Url,
    pub headers: ForwardHeaders,
    /// Output filename inside the job temp directory.
    pub output_name: String,
}

/// Progress emitted towards the job registry.
#[derive(Debug, Clone, Default)]
pub struct DriverProgress {
    pub percent: Option<f32>,
    pub elapsed_secs: Option<f64>,
    pub total_secs: Option<f64>,
    pub speed: Option<String>,
    pub message: Option<String>,
}

pub type DriverProgressFn = Arc<dyn Fn(DriverProgress) + Send + Sync>;

/// Result of a successful driver run.
#[derive(Debug, Clone)]
pub struct DriverOutcome {
    pub output_path: PathBuf,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttemptMode {
    Direct,
    Proxy,
}

/// Orchestrates resolve, fetch and transcode for one job.
pub struct DownloadDriver {
    resolver: PlaylistResolver,
    fetcher: SegmentFetcher,
    runner: FfmpegRunner,
    tokens: ProxyTokenStore,
    config: TranscoderConfig,
}

impl DownloadDriver {
    pub fn new(
        resolver: PlaylistResolver,
        fetcher: SegmentFetcher,
        runner: FfmpegRunner,
        tokens: ProxyTokenStore,
        config: TranscoderConfig,
    ) -> Self {
        Self {
            resolver,
            fetcher,
            runner,
            tokens,
            config,
        }
    }

    /// Run all attempt modes for `request` until one produces a
    /// validated output file.
    pub async fn run(
        &self,
        request: &DriveRequest,
        temp_dir: &Path,
        cancel: &CancellationToken,
        progress: DriverProgressFn,
    ) -> Result<DriverOutcome, TranscoderError> {
        tokio::fs::create_dir_all(temp_dir).await?;
        let output = temp_dir.join(&request.output_name);

        if !is_hls_source(&request.url) {
            progress(DriverProgress {
                message: Some("Downloading file".to_string()),
                ..Default::default()
            });
            let size = self
                .transcode(
                    request.url.as_str(),
                    &request.headers,
                    false,
                    &output,
                    None,
                    cancel,
                    &progress,
                )
                .await?;
            return Ok(DriverOutcome {
                output_path: output,
                size_bytes: size,
            });
        }

        let modes = if self.config.prefer_proxy {
            [AttemptMode::Proxy, AttemptMode::Direct]
        } else {
            [AttemptMode::Direct, AttemptMode::Proxy]
        };

        let mut last_error = None;
        for mode in modes {
            if cancel.is_cancelled() {
                return Err(TranscoderError::Cancelled);
            }
            match self
                .attempt_hls(mode, request, temp_dir, &output, cancel, &progress)
                .await
            {
                Ok(outcome) => return Ok(outcome),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    warn!(mode = ?mode, error = %e, url = %request.url, "Attempt failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or(TranscoderError::OutputIncomplete {
            reason: "all attempt modes exhausted".to_string(),
        }))
    }

    async fn attempt_hls(
        &self,
        mode: AttemptMode,
        request: &DriveRequest,
        temp_dir: &Path,
        output: &Path,
        cancel: &CancellationToken,
        progress: &DriverProgressFn,
    ) -> Result<DriverOutcome, TranscoderError> {
        progress(DriverProgress {
            message: Some("Resolving playlist".to_string()),
            ..Default::default()
        });
        let playlist = self.resolver.resolve(&request.url, &request.headers).await?;
        let expected = (playlist.total_duration > 0.0).then_some(playlist.total_duration);

        let size = match mode {
            AttemptMode::Direct => {
                self.attempt_direct(request, &playlist, temp_dir, output, expected, cancel, progress)
                    .await?
            }
            AttemptMode::Proxy => {
                self.attempt_proxy(request, &playlist, temp_dir, output, expected, cancel, progress)
                    .await?
            }
        };

        info!(url = %request.url, mode = ?mode, size_bytes = size, "Download complete");
        Ok(DriverOutcome {
            output_path: output.to_path_buf(),
            size_bytes: size,
        })
    }

    /// Direct mode: local segment pool when eligible, else a temp
    /// manifest with the original URLs and forwarded headers.
    #[allow(clippy::too_many_arguments)]
    async fn attempt_direct(
        &self,
        request: &DriveRequest,
        playlist: &MediaPlaylist,
        temp_dir: &Path,
        output: &Path,
        expected: Option<f64>,
        cancel: &CancellationToken,
        progress: &DriverProgressFn,
    ) -> Result<u64, TranscoderError> {
        let pool_progress = {
            let progress = Arc::clone(progress);
            Arc::new(move |percent: f32| {
                progress(DriverProgress {
                    percent: Some(percent),
                    message: Some("Downloading segments".to_string()),
                    ..Default::default()
                });
            })
        };

        match self
            .fetcher
            .fetch_all(playlist, temp_dir, &request.headers, cancel, Some(pool_progress))
            .await
        {
            Ok(Some(fetched)) => {
                info!(
                    segments = fetched.segment_count,
                    "Transcoding from local segments"
                );
                return self
                    .transcode(
                        &fetched.manifest_path.to_string_lossy(),
                        &ForwardHeaders::default(),
                        true,
                        output,
                        expected,
                        cancel,
                        progress,
                    )
                    .await;
            }
            Ok(None) => {}
            Err(FetchError::Cancelled) => return Err(TranscoderError::Cancelled),
            Err(e) => {
                warn!(error = %e, "Local segment download failed, using remote manifest");
            }
        }

        let manifest_path = temp_dir.join(REMOTE_MANIFEST_NAME);
        tokio::fs::write(&manifest_path, playlist.render(&HashMap::new(), &[])).await?;
        self.transcode(
            &manifest_path.to_string_lossy(),
            &request.headers,
            true,
            output,
            expected,
            cancel,
            progress,
        )
        .await
    }

    /// Proxy mode: every manifest URI goes through the gateway, which
    /// holds the forwarding context under a fresh token.
    #[allow(clippy::too_many_arguments)]
    async fn attempt_proxy(
        &self,
        request: &DriveRequest,
        playlist: &MediaPlaylist,
        temp_dir: &Path,
        output: &Path,
        expected: Option<f64>,
        cancel: &CancellationToken,
        progress: &DriverProgressFn,
    ) -> Result<u64, TranscoderError> {
        let context = ProxyContext {
            headers: request.headers.clone(),
            allow_image_segments: playlist.allow_image_segments,
            opaque_segments: playlist.opaque_image_segments,
        };
        let token = self.tokens.issue(&context).await;

        let manifest = self.rewrite_through_gateway(playlist, &token);
        let manifest_path = temp_dir.join(REMOTE_MANIFEST_NAME);
        tokio::fs::write(&manifest_path, manifest).await?;

        let result = self
            .transcode(
                &manifest_path.to_string_lossy(),
                &ForwardHeaders::default(),
                true,
                output,
                expected,
                cancel,
                progress,
            )
            .await;

        self.tokens.revoke(&token).await;
        result
    }

    /// Replace every URI the manifest references, including auxiliary
    /// `URI="..."` directives, with a gateway URL.
    fn rewrite_through_gateway(&self, playlist: &MediaPlaylist, token: &str) -> String {
        let mut replace: HashMap<usize, String> = HashMap::new();
        for r in playlist
            .segments
            .iter()
            .chain(playlist.keys.iter())
            .chain(playlist.maps.iter())
            .chain(playlist.aux.iter())
        {
            replace.insert(r.line_index, self.gateway_url(token, &r.url));
        }
        playlist.render(&replace, &[])
    }

    fn gateway_url(&self, token: &str, target: &Url) -> String {
        format!(
            "{}/api/v1/proxy/segment?token={}&url={}",
            self.config.proxy_base_url.trim_end_matches('/'),
            token,
            URL_SAFE_NO_PAD.encode(target.as_str())
        )
    }

    /// Run ffmpeg with capability narrowing, then validate the output.
    #[allow(clippy::too_many_arguments)]
    async fn transcode(
        &self,
        input: &str,
        headers: &ForwardHeaders,
        is_hls: bool,
        output: &Path,
        expected: Option<f64>,
        cancel: &CancellationToken,
        progress: &DriverProgressFn,
    ) -> Result<u64, TranscoderError> {
        let mut args = TranscodeArgs::new(is_hls, self.config.narrowing_retries);
        let output_str = output.to_string_lossy().to_string();

        loop {
            let argv = args.build(input, &output_str, headers);
            let runner_progress = {
                let progress = Arc::clone(progress);
                Arc::new(move |p: TranscodeProgress| {
                    let percent = expected.filter(|d| *d > 0.0).map(|d| {
                        ((p.elapsed_secs / d * 100.0) as f32).clamp(0.0, 99.0)
                    });
                    progress(DriverProgress {
                        percent,
                        elapsed_secs: Some(p.elapsed_secs),
                        total_secs: expected,
                        speed: p.speed.clone(),
                        message: Some("Transcoding".to_string()),
                    });
                })
            };

            match self.runner.run(&argv, cancel, Some(runner_progress)).await {
                Ok(outcome) => {
                    return self
                        .runner
                        .validate_output(output, outcome.elapsed_secs, expected)
                        .await;
                }
                Err(TranscoderError::UnsupportedOption { option }) => {
                    match args.narrow(&option) {
                        Some(group) => {
                            warn!(option, ?group, "Narrowing ffmpeg arguments and retrying");
                        }
                        None => return Err(TranscoderError::UnsupportedOption { option }),
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// HLS detection by path or query containing `m3u8`.
pub fn is_hls_source(url: &Url) -> bool {
    let path = url.path().to_ascii_lowercase();
    let query = url.query().unwrap_or("").to_ascii_lowercase();
    path.contains("m3u8") || query.contains("m3u8")
}

//! ffmpeg subprocess runner with progress parsing.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::config::TranscoderConfig;
use super::error::TranscoderError;

/// Cap on retained stderr output.
const STDERR_CAP: usize = 4096;

const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// Progress parsed from ffmpeg's `-progress pipe:1` records.
#[derive(Debug, Clone, Default)]
pub struct TranscodeProgress {
    /// Output time produced so far, in seconds.
    pub elapsed_secs: f64,
    /// ffmpeg's reported speed, e.g. "12.4x".
    pub speed: Option<String>,
}

pub type TranscodeProgressFn = Arc<dyn Fn(TranscodeProgress) + Send + Sync>;

/// Final state of a successful ffmpeg run.
#[derive(Debug, Clone)]
pub struct TranscodeOutcome {
    pub elapsed_secs: f64,
    pub speed: Option<String>,
}

/// Spawns ffmpeg and consumes its machine-readable progress stream.
pub struct FfmpegRunner {
    config: TranscoderConfig,
}

impl FfmpegRunner {
    pub fn new(config: TranscoderConfig) -> Self {
        Self { config }
    }

    /// Run ffmpeg with `args` to completion.
    ///
    /// Progress callbacks fire at most once per second, plus a final
    /// one when ffmpeg writes `progress=end`. Cancellation kills the
    /// subprocess.
    pub async fn run(
        &self,
        args: &[String],
        cancel: &CancellationToken,
        progress: Option<TranscodeProgressFn>,
    ) -> Result<TranscodeOutcome, TranscoderError> {
        debug!(ffmpeg = %self.config.ffmpeg_path, ?args, "Spawning ffmpeg");

        let mut child = Command::new(&self.config.ffmpeg_path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    TranscoderError::NotFound {
                        path: self.config.ffmpeg_path.clone(),
                    }
                } else {
                    TranscoderError::Io(e)
                }
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::with_capacity(STDERR_CAP);
            if let Some(stderr) = stderr {
                let mut reader = BufReader::new(stderr);
                let mut chunk = [0u8; 512];
                loop {
                    match reader.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            let room = STDERR_CAP.saturating_sub(buf.len());
                            buf.extend_from_slice(&chunk[..n.min(room)]);
                            if room <= n {
                                // Keep draining so the pipe never blocks.
                                continue;
                            }
                        }
                    }
                }
            }
            String::from_utf8_lossy(&buf).to_string()
        });

        let mut state = TranscodeProgress::default();
        let mut last_emit = Instant::now() - PROGRESS_INTERVAL;

        let consume = async {
            if let Some(stdout) = stdout {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let (key, value) = match line.split_once('=') {
                        Some(pair) => pair,
                        None => continue,
                    };
                    match key.trim() {
                        "out_time_ms" => {
                            // Microseconds despite the name.
                            if let Ok(us) = value.trim().parse::<f64>() {
                                state.elapsed_secs = us / 1_000_000.0;
                            }
                        }
                        "speed" => {
                            let speed = value.trim();
                            if !speed.is_empty() && speed != "N/A" {
                                state.speed = Some(speed.to_string());
                            }
                        }
                        "progress" => {
                            let finished = value.trim() == "end";
                            if let Some(ref progress) = progress {
                                if finished || last_emit.elapsed() >= PROGRESS_INTERVAL {
                                    last_emit = Instant::now();
                                    progress(state.clone());
                                }
                            }
                        }
                        _ => {}
                    }
                }
            }
            child.wait().await
        };

        let timeout = Duration::from_secs(self.config.timeout_secs);
        let status = tokio::select! {
            r = tokio::time::timeout(timeout, consume) => match r {
                Ok(status) => status?,
                Err(_) => {
                    stderr_task.abort();
                    return Err(TranscoderError::Timeout {
                        timeout_secs: self.config.timeout_secs,
                    });
                }
            },
            _ = cancel.cancelled() => {
                stderr_task.abort();
                return Err(TranscoderError::Cancelled);
            }
        };

        let stderr_text = stderr_task.await.unwrap_or_default();

        if !status.success() {
            if let Some(option) = super::args::parse_unrecognized_option(&stderr_text) {
                return Err(TranscoderError::UnsupportedOption { option });
            }
            return Err(TranscoderError::ExitFailure {
                code: status.code(),
                stderr: stderr_text,
            });
        }

        Ok(TranscodeOutcome {
            elapsed_secs: state.elapsed_secs,
            speed: state.speed,
        })
    }

    /// Check the produced file against expectations.
    ///
    /// A zero-byte file or an output noticeably shorter than the
    /// manifest's declared duration fails the attempt even though
    /// ffmpeg exited cleanly.
    pub async fn validate_output(
        &self,
        output: &Path,
        elapsed_secs: f64,
        expected_secs: Option<f64>,
    ) -> Result<u64, TranscoderError> {
        let meta = tokio::fs::metadata(output)
            .await
            .map_err(|_| TranscoderError::OutputIncomplete {
                reason: "output file not created".to_string(),
            })?;
        if meta.len() == 0 {
            return Err(TranscoderError::OutputIncomplete {
                reason: "output file is empty".to_string(),
            });
        }
        if let Some(expected) = expected_secs {
            if expected > 0.0 && elapsed_secs < expected * self.config.completeness_threshold {
                return Err(TranscoderError::OutputIncomplete {
                    reason: format!(
                        "output covers {:.0}s of expected {:.0}s",
                        elapsed_secs, expected
                    ),
                });
            }
        }
        Ok(meta.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner() -> FfmpegRunner {
        FfmpegRunner::new(TranscoderConfig::default())
    }

    #[tokio::test]
    async fn test_validate_output_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let result = runner()
            .validate_output(&tmp.path().join("missing.mp4"), 100.0, None)
            .await;
        assert!(matches!(
            result,
            Err(TranscoderError::OutputIncomplete { .. })
        ));
    }

    #[tokio::test]
    async fn test_validate_output_empty_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("out.mp4");
        tokio::fs::write(&path, b"").await.unwrap();
        let result = runner().validate_output(&path, 100.0, None).await;
        assert!(matches!(
            result,
            Err(TranscoderError::OutputIncomplete { .. })
        ));
    }

    #[tokio::test]
    async fn test_validate_output_duration_shortfall() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("out.mp4");
        tokio::fs::write(&path, b"data").await.unwrap();
        let result = runner().validate_output(&path, 50.0, Some(100.0)).await;
        assert!(matches!(
            result,
            Err(TranscoderError::OutputIncomplete { .. })
        ));
    }

    #[tokio::test]
    async fn test_validate_output_within_threshold() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("out.mp4");
        tokio::fs::write(&path, b"data").await.unwrap();
        let size = runner()
            .validate_output(&path, 95.0, Some(100.0))
            .await
            .unwrap();
        assert_eq!(size, 4);
    }

    #[tokio::test]
    async fn test_validate_output_no_expected_duration() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("out.mp4");
        tokio::fs::write(&path, b"data").await.unwrap();
        assert!(runner().validate_output(&path, 0.0, None).await.is_ok());
    }

    #[tokio::test]
    async fn test_run_missing_binary() {
        let runner = FfmpegRunner::new(TranscoderConfig {
            ffmpeg_path: "/nonexistent/ffmpeg-binary".to_string(),
            ..Default::default()
        });
        let result = runner
            .run(&["-version".to_string()], &CancellationToken::new(), None)
            .await;
        assert!(matches!(result, Err(TranscoderError::NotFound { .. })));
    }
}

//! Job submission and driver task spawning.

use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;
use url::Url;

use crate::headers::parse_source_param;
use crate::quota::QuotaManager;
use crate::transcoder::{DownloadDriver, DriveRequest, DriverProgress, DriverProgressFn};

use super::registry::JobRegistry;
use super::types::{Job, JobProgress, JobStatus, JobUpdate, SubmitOutcome, SubmitRequest};

/// Errors surfaced by job submission.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("Invalid source URL: {0}")]
    InvalidUrl(String),

    #[error("Daily download limit reached")]
    QuotaExceeded,
}

/// Front door for job submission: dedup, quota, then a spawned driver
/// task that owns the job until a terminal state.
pub struct JobService {
    registry: Arc<JobRegistry>,
    driver: Arc<DownloadDriver>,
    quota: QuotaManager,
}

impl JobService {
    pub fn new(registry: Arc<JobRegistry>, driver: Arc<DownloadDriver>, quota: QuotaManager) -> Self {
        Self {
            registry,
            driver,
            quota,
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn quota(&self) -> &QuotaManager {
        &self.quota
    }

    /// Submit a download. A dedup hit returns the existing job without
    /// consuming quota; otherwise one quota unit is consumed and a
    /// driver task is spawned.
    pub async fn submit(
        &self,
        user: &str,
        quota_limit: Option<u32>,
        request: SubmitRequest,
    ) -> Result<SubmitOutcome, SubmitError> {
        let key = request.fingerprint(user);
        if let Some(job) = self.registry.find_reusable(&key).await {
            info!(job_id = %job.id, user, "Dedup hit");
            return Ok(SubmitOutcome { job, deduped: true });
        }

        let (raw_url, headers) = parse_source_param(&request.url_param);
        let url = Url::parse(raw_url.trim())
            .map_err(|_| SubmitError::InvalidUrl(raw_url.trim().to_string()))?;

        let decision = self.quota.consume(user, quota_limit).await;
        if !decision.allowed {
            return Err(SubmitError::QuotaExceeded);
        }
        let consumed = decision.remaining.is_some();

        let cancel = CancellationToken::new();
        let mut job = Job::new(user, key, &request);
        let temp_dir = self.registry.config().temp_root.join(&job.id);
        job.temp_dir = Some(temp_dir.clone());
        self.registry.create(job.clone(), cancel.clone()).await;

        let drive = DriveRequest {
            url,
            headers,
            output_name: request.output_filename(),
        };
        self.spawn_driver(job.clone(), drive, temp_dir, cancel, consumed);

        info!(job_id = %job.id, user, url = %request.url_param, "Job submitted");
        Ok(SubmitOutcome {
            job,
            deduped: false,
        })
    }

    fn spawn_driver(
        &self,
        job: Job,
        drive: DriveRequest,
        temp_dir: std::path::PathBuf,
        cancel: CancellationToken,
        quota_consumed: bool,
    ) {
        let registry = Arc::clone(&self.registry);
        let driver = Arc::clone(&self.driver);
        let quota = self.quota.clone();

        tokio::spawn(async move {
            let id = job.id.clone();
            let _ = registry
                .update(
                    &id,
                    JobUpdate {
                        status: Some(JobStatus::Running),
                        progress: Some(JobProgress {
                            message: Some("Starting".to_string()),
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                )
                .await;

            let progress: DriverProgressFn = {
                let registry = Arc::clone(&registry);
                let id = id.clone();
                Arc::new(move |p: DriverProgress| {
                    let registry = Arc::clone(&registry);
                    let id = id.clone();
                    tokio::spawn(async move {
                        let _ = registry
                            .update(
                                &id,
                                JobUpdate {
                                    progress: Some(JobProgress {
                                        percent: p.percent,
                                        elapsed_secs: p.elapsed_secs,
                                        total_secs: p.total_secs,
                                        speed: p.speed,
                                        message: p.message,
                                    }),
                                    ..Default::default()
                                },
                            )
                            .await;
                    });
                })
            };

            let filename = drive.output_name.clone();
            match driver.run(&drive, &temp_dir, &cancel, progress).await {
                Ok(outcome) => {
                    info!(job_id = %id, size_bytes = outcome.size_bytes, "Job completed");
                    let _ = registry
                        .mark_completed(&id, filename, outcome.output_path, outcome.size_bytes)
                        .await;
                }
                Err(e) => {
                    info!(job_id = %id, error = %e, "Job failed");
                    let _ = registry.mark_failed(&id, e.to_string()).await;
                    if quota_consumed {
                        quota.refund(&job.user).await;
                    }
                }
            }
            JobRegistry::schedule_cleanup(registry, id);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::fetcher::{FetcherConfig, SegmentFetcher};
    use crate::playlist::{PlaylistResolver, ResolverConfig};
    use crate::proxy::{ProxyConfig, ProxyTokenStore};
    use crate::quota::QuotaConfig;
    use crate::job::registry::RegistryConfig;
    use crate::transcoder::{FfmpegRunner, TranscoderConfig};

    fn service(quota_enabled: bool) -> JobService {
        let cache: Arc<dyn crate::cache::CacheStore> = Arc::new(MemoryCache::new());
        let registry = Arc::new(JobRegistry::new(
            Arc::clone(&cache),
            RegistryConfig::default(),
        ));
        let driver = Arc::new(DownloadDriver::new(
            PlaylistResolver::new(ResolverConfig::default()),
            SegmentFetcher::new(FetcherConfig::default()),
            FfmpegRunner::new(TranscoderConfig {
                ffmpeg_path: "/nonexistent/ffmpeg".to_string(),
                ..Default::default()
            }),
            ProxyTokenStore::new(Arc::clone(&cache), ProxyConfig::default()),
            TranscoderConfig::default(),
        ));
        let quota = QuotaManager::new(
            cache,
            QuotaConfig {
                enabled: quota_enabled,
                limit_per_day: 2,
            },
        );
        JobService::new(registry, driver, quota)
    }

    fn request(url: &str) -> SubmitRequest {
        SubmitRequest {
            url_param: url.to_string(),
            title: Some("Movie".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_submit_rejects_invalid_url() {
        let service = service(false);
        let result = service
            .submit("alice", None, request("not a url"))
            .await;
        assert!(matches!(result, Err(SubmitError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_submit_dedups_active_job() {
        let service = service(false);
        let first = service
            .submit("alice", None, request("https://h/v.m3u8"))
            .await
            .unwrap();
        assert!(!first.deduped);

        let second = service
            .submit("alice", None, request("https://h/v.m3u8"))
            .await
            .unwrap();
        assert!(second.deduped);
        assert_eq!(first.job.id, second.job.id);
    }

    #[tokio::test]
    async fn test_submit_enforces_quota() {
        let service = service(true);
        service
            .submit("alice", Some(2), request("https://a/1.m3u8"))
            .await
            .unwrap();
        service
            .submit("alice", Some(2), request("https://a/2.m3u8"))
            .await
            .unwrap();
        let third = service
            .submit("alice", Some(2), request("https://a/3.m3u8"))
            .await;
        assert!(matches!(third, Err(SubmitError::QuotaExceeded)));
    }

    #[tokio::test]
    async fn test_dedup_does_not_consume_quota() {
        let service = service(true);
        service
            .submit("alice", Some(2), request("https://a/1.m3u8"))
            .await
            .unwrap();
        // Same source again: dedup hit, counter untouched.
        service
            .submit("alice", Some(2), request("https://a/1.m3u8"))
            .await
            .unwrap();
        let check = service.quota().check("alice", Some(2)).await;
        assert_eq!(check.remaining, Some(1));
    }
}

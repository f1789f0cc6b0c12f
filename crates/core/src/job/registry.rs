//! In-memory job registry with cache snapshots.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::CacheStore;

use super::types::{Job, JobStatus, JobUpdate};

/// Minimum interval between cache snapshots of one job.
const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(2);

/// Errors from registry lookups and transitions.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Job not found")]
    NotFound,

    /// Cancellation requested on a job that already finished.
    #[error("Job is not running")]
    NotRunning,
}

/// Registry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Delay before a terminal job's entry and artifacts are removed.
    #[serde(default = "default_cleanup_delay_secs")]
    pub cleanup_delay_secs: u64,
    /// Cache snapshot lifetime.
    #[serde(default = "default_snapshot_ttl_secs")]
    pub snapshot_ttl_secs: u64,
    /// Per-user job id index length cap.
    #[serde(default = "default_user_index_cap")]
    pub user_index_cap: usize,
    /// Root directory job temp directories are created under.
    #[serde(default = "default_temp_root")]
    pub temp_root: PathBuf,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            cleanup_delay_secs: default_cleanup_delay_secs(),
            snapshot_ttl_secs: default_snapshot_ttl_secs(),
            user_index_cap: default_user_index_cap(),
            temp_root: default_temp_root(),
        }
    }
}

fn default_cleanup_delay_secs() -> u64 {
    2 * 3600
}

fn default_snapshot_ttl_secs() -> u64 {
    6 * 3600
}

fn default_user_index_cap() -> usize {
    50
}

fn default_temp_root() -> PathBuf {
    std::env::temp_dir().join("vidfetch")
}

struct Entry {
    job: Job,
    cancel: Option<CancellationToken>,
    last_snapshot: Option<Instant>,
}

/// Authoritative in-process job state, mirrored to the shared cache
/// on a best-effort basis.
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, Entry>>,
    cache: Arc<dyn CacheStore>,
    config: RegistryConfig,
}

impl JobRegistry {
    pub fn new(cache: Arc<dyn CacheStore>, config: RegistryConfig) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            cache,
            config,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    fn snapshot_key(id: &str) -> String {
        format!("job:{}", id)
    }

    fn index_key(user: &str) -> String {
        format!("jobs:user:{}", user)
    }

    /// Register a freshly created job and its cancellation token.
    pub async fn create(&self, job: Job, cancel: CancellationToken) {
        {
            let mut jobs = self.jobs.write().await;
            jobs.insert(
                job.id.clone(),
                Entry {
                    job: job.clone(),
                    cancel: Some(cancel),
                    last_snapshot: None,
                },
            );
        }
        self.index_for_user(&job).await;
        self.snapshot(&job).await;
    }

    /// Dedup lookup: an active job, or a completed one whose output
    /// file still exists on disk.
    pub async fn find_reusable(&self, key: &str) -> Option<Job> {
        let candidate = {
            let jobs = self.jobs.read().await;
            jobs.values()
                .filter(|e| e.job.key == key)
                .filter(|e| e.job.status != JobStatus::Failed)
                .max_by_key(|e| e.job.created_at)
                .map(|e| e.job.clone())
        };
        let job = candidate?;
        if job.status.is_active() {
            return Some(job);
        }
        match &job.output_path {
            Some(path) if tokio::fs::try_exists(path).await.unwrap_or(false) => Some(job),
            _ => None,
        }
    }

    pub async fn get(&self, id: &str) -> Option<Job> {
        let jobs = self.jobs.read().await;
        jobs.get(id).map(|e| e.job.clone())
    }

    /// Merge a partial update into the job. Progress merges
    /// field-by-field; snapshots are throttled per job.
    pub async fn update(&self, id: &str, update: JobUpdate) -> Result<Job, RegistryError> {
        let (job, snapshot_due) = {
            let mut jobs = self.jobs.write().await;
            let entry = jobs.get_mut(id).ok_or(RegistryError::NotFound)?;

            if let Some(status) = update.status {
                entry.job.status = status;
            }
            if let Some(ref progress) = update.progress {
                entry.job.progress.merge(progress);
            }
            if update.filename.is_some() {
                entry.job.filename = update.filename;
            }
            if update.output_path.is_some() {
                entry.job.output_path = update.output_path;
            }
            if update.size_bytes.is_some() {
                entry.job.size_bytes = update.size_bytes;
            }
            if update.error.is_some() {
                entry.job.error = update.error;
            }
            entry.job.updated_at = chrono::Utc::now();

            let terminal = entry.job.status.is_terminal();
            let due = terminal
                || entry
                    .last_snapshot
                    .map(|t| t.elapsed() >= SNAPSHOT_INTERVAL)
                    .unwrap_or(true);
            if due {
                entry.last_snapshot = Some(Instant::now());
            }
            if terminal {
                entry.cancel = None;
            }
            (entry.job.clone(), due)
        };

        if snapshot_due {
            self.snapshot(&job).await;
        }
        Ok(job)
    }

    pub async fn mark_completed(
        &self,
        id: &str,
        filename: String,
        output_path: PathBuf,
        size_bytes: u64,
    ) -> Result<Job, RegistryError> {
        self.update(
            id,
            JobUpdate {
                status: Some(JobStatus::Completed),
                progress: Some(super::types::JobProgress {
                    percent: Some(100.0),
                    message: Some("Completed".to_string()),
                    ..Default::default()
                }),
                filename: Some(filename),
                output_path: Some(output_path),
                size_bytes: Some(size_bytes),
                error: None,
            },
        )
        .await
    }

    pub async fn mark_failed(&self, id: &str, error: String) -> Result<Job, RegistryError> {
        self.update(
            id,
            JobUpdate {
                status: Some(JobStatus::Failed),
                error: Some(error.clone()),
                progress: Some(super::types::JobProgress {
                    message: Some(error),
                    ..Default::default()
                }),
                ..Default::default()
            },
        )
        .await
    }

    /// Signal the job's cancellation token and force a failed state.
    pub async fn cancel(&self, id: &str) -> Result<Job, RegistryError> {
        let token = {
            let jobs = self.jobs.read().await;
            let entry = jobs.get(id).ok_or(RegistryError::NotFound)?;
            if entry.job.status.is_terminal() {
                return Err(RegistryError::NotRunning);
            }
            entry.cancel.clone()
        };
        if let Some(token) = token {
            token.cancel();
        }
        self.mark_failed(id, "Canceled".to_string()).await
    }

    /// Remove the entry, its disk artifacts and its cache snapshot.
    pub async fn cleanup(&self, id: &str) {
        let job = {
            let mut jobs = self.jobs.write().await;
            jobs.remove(id).map(|e| e.job)
        };
        let job = match job {
            Some(job) => job,
            None => return,
        };

        if let Some(ref temp_dir) = job.temp_dir {
            if let Err(e) = tokio::fs::remove_dir_all(temp_dir).await {
                debug!(job_id = %id, error = %e, "Temp dir removal failed");
            }
        } else if let Some(ref output) = job.output_path {
            if let Err(e) = tokio::fs::remove_file(output).await {
                debug!(job_id = %id, error = %e, "Output removal failed");
            }
        }

        if let Err(e) = self.cache.remove(&Self::snapshot_key(id)).await {
            debug!(job_id = %id, error = %e, "Snapshot eviction failed");
        }
        debug!(job_id = %id, "Job cleaned up");
    }

    /// Run `cleanup` after the configured delay.
    pub fn schedule_cleanup(registry: Arc<JobRegistry>, id: String) {
        let delay = Duration::from_secs(registry.config.cleanup_delay_secs);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            registry.cleanup(&id).await;
        });
    }

    /// Jobs owned by `user`, most recent first.
    ///
    /// The cached id index is consulted first and self-healed; when it
    /// is empty or unusable the in-memory map is scanned instead.
    pub async fn list_for_user(&self, user: &str) -> Vec<Job> {
        let index = self.read_index(user).await;
        if !index.is_empty() {
            let mut result = Vec::new();
            let mut healed = Vec::new();
            {
                let jobs = self.jobs.read().await;
                for id in &index {
                    if let Some(entry) = jobs.get(id) {
                        if entry.job.user == user {
                            healed.push(id.clone());
                            result.push(entry.job.clone());
                        }
                    }
                }
            }
            if healed.len() != index.len() {
                self.write_index(user, &healed).await;
            }
            if !result.is_empty() {
                return result;
            }
        }

        let jobs = self.jobs.read().await;
        let mut result: Vec<Job> = jobs
            .values()
            .filter(|e| e.job.user == user)
            .map(|e| e.job.clone())
            .collect();
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        result
    }

    async fn index_for_user(&self, job: &Job) {
        let mut index = self.read_index(&job.user).await;
        index.retain(|id| id != &job.id);
        index.insert(0, job.id.clone());
        index.truncate(self.config.user_index_cap);
        self.write_index(&job.user, &index).await;
    }

    async fn read_index(&self, user: &str) -> Vec<String> {
        match self.cache.get(&Self::index_key(user)).await {
            Ok(Some(value)) => serde_json::from_value(value).unwrap_or_default(),
            Ok(None) => Vec::new(),
            Err(e) => {
                debug!(user, error = %e, "User index read failed");
                Vec::new()
            }
        }
    }

    async fn write_index(&self, user: &str, index: &[String]) {
        let value = match serde_json::to_value(index) {
            Ok(value) => value,
            Err(_) => return,
        };
        if let Err(e) = self
            .cache
            .set(
                &Self::index_key(user),
                value,
                Some(Duration::from_secs(self.config.snapshot_ttl_secs)),
            )
            .await
        {
            warn!(user, error = %e, "User index write failed");
        }
    }

    async fn snapshot(&self, job: &Job) {
        let value = match serde_json::to_value(job) {
            Ok(value) => value,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Job snapshot serialization failed");
                return;
            }
        };
        if let Err(e) = self
            .cache
            .set(
                &Self::snapshot_key(&job.id),
                value,
                Some(Duration::from_secs(self.config.snapshot_ttl_secs)),
            )
            .await
        {
            warn!(job_id = %job.id, error = %e, "Job snapshot write failed");
        }
    }
}

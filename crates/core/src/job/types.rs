//! Job lifecycle data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use uuid::Uuid;

use crate::headers::parse_source_param;

/// Job lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

/// Progress fields merged update-by-update rather than replaced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobProgress {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl JobProgress {
    /// Merge `update` into self, keeping existing fields the update
    /// leaves unset.
    pub fn merge(&mut self, update: &JobProgress) {
        if update.percent.is_some() {
            self.percent = update.percent;
        }
        if update.elapsed_secs.is_some() {
            self.elapsed_secs = update.elapsed_secs;
        }
        if update.total_secs.is_some() {
            self.total_secs = update.total_secs;
        }
        if update.speed.is_some() {
            self.speed = update.speed.clone();
        }
        if update.message.is_some() {
            self.message = update.message.clone();
        }
    }
}

/// Submission payload: source reference plus display metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub url_param: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub year: Option<u16>,
    #[serde(default)]
    pub episode: Option<String>,
    #[serde(default)]
    pub episode_title: Option<String>,
}

impl SubmitRequest {
    /// Content fingerprint used as the dedup key: same user, same
    /// normalized URL and same display metadata map to one job.
    pub fn fingerprint(&self, user: &str) -> String {
        let (url, _) = parse_source_param(&self.url_param);
        let mut hasher = Sha256::new();
        hasher.update(user.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(url.trim().as_bytes());
        for field in [
            self.title.as_deref().unwrap_or(""),
            &self.year.map(|y| y.to_string()).unwrap_or_default(),
            self.episode.as_deref().unwrap_or(""),
            self.episode_title.as_deref().unwrap_or(""),
        ] {
            hasher.update(b"\x1f");
            hasher.update(field.as_bytes());
        }
        let digest = hasher.finalize();
        digest.iter().take(16).map(|b| format!("{:02x}", b)).collect()
    }

    /// Output filename derived from the display metadata.
    pub fn output_filename(&self) -> String {
        let mut name = sanitize_filename(self.title.as_deref().unwrap_or("download"));
        if let Some(year) = self.year {
            name.push_str(&format!(" ({})", year));
        }
        if let Some(ref episode) = self.episode {
            name.push_str(&format!(" - {}", sanitize_filename(episode)));
        }
        if let Some(ref episode_title) = self.episode_title {
            name.push_str(&format!(" - {}", sanitize_filename(episode_title)));
        }
        name.push_str(".mp4");
        name
    }
}

fn sanitize_filename(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        "download".to_string()
    } else {
        trimmed.to_string()
    }
}

/// One tracked download job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    /// Dedup fingerprint.
    pub key: String,
    pub user: String,
    pub url_param: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episode_title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: JobStatus,
    pub progress: JobProgress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Job {
    pub fn new(user: &str, key: String, request: &SubmitRequest) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            key,
            user: user.to_string(),
            url_param: request.url_param.clone(),
            title: request.title.clone(),
            year: request.year,
            episode: request.episode.clone(),
            episode_title: request.episode_title.clone(),
            created_at: now,
            updated_at: now,
            status: JobStatus::Queued,
            progress: JobProgress::default(),
            filename: None,
            output_path: None,
            temp_dir: None,
            size_bytes: None,
            error: None,
        }
    }
}

/// Partial update merged into a job by the registry.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub progress: Option<JobProgress>,
    pub filename: Option<String>,
    pub output_path: Option<PathBuf>,
    pub size_bytes: Option<u64>,
    pub error: Option<String>,
}

/// Result of a job submission.
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    pub job: Job,
    pub deduped: bool,
}

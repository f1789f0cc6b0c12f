//! Download job API handlers.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::Response,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use vidfetch_core::{Job, JobProgress, JobStatus, RegistryError, SubmitError, SubmitRequest};

use crate::api::middleware::AuthUser;
use crate::metrics::{JOBS_CREATED_TOTAL, JOBS_DEDUP_HITS_TOTAL, JOBS_QUOTA_REJECTED_TOTAL};
use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for submitting a download
#[derive(Debug, Deserialize)]
pub struct SubmitBody {
    /// Source URL, optionally with a `|key=value` header block appended
    pub url: String,
    pub title: Option<String>,
    pub year: Option<u16>,
    pub episode: Option<String>,
    pub episode_title: Option<String>,
}

/// Response for job operations
#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub id: String,
    pub status: JobStatus,
    pub progress: JobProgress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episode_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Job> for JobResponse {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            status: job.status,
            progress: job.progress,
            title: job.title,
            year: job.year,
            episode: job.episode,
            episode_title: job.episode_title,
            filename: job.filename,
            size_bytes: job.size_bytes,
            error: job.error,
            created_at: job.created_at.to_rfc3339(),
            updated_at: job.updated_at.to_rfc3339(),
        }
    }
}

/// Response for job submission
#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub deduped: bool,
    #[serde(flatten)]
    pub job: JobResponse,
}

/// Response for listing jobs
#[derive(Debug, Serialize)]
pub struct ListJobsResponse {
    pub jobs: Vec<JobResponse>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct JobErrorResponse {
    pub error: String,
}

fn error_json(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<JobErrorResponse>) {
    (
        status,
        Json(JobErrorResponse {
            error: message.into(),
        }),
    )
}

// ============================================================================
// Handlers
// ============================================================================

/// Submit a download job
pub async fn submit_job(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(body): Json<SubmitBody>,
) -> Result<(StatusCode, Json<SubmitResponse>), (StatusCode, Json<JobErrorResponse>)> {
    let request = SubmitRequest {
        url_param: body.url,
        title: body.title,
        year: body.year,
        episode: body.episode,
        episode_title: body.episode_title,
    };
    let quota_limit = state.config().quota_limit_for(&user);

    match state.jobs().submit(&user, quota_limit, request).await {
        Ok(outcome) => {
            let status = if outcome.deduped {
                JOBS_DEDUP_HITS_TOTAL.inc();
                StatusCode::OK
            } else {
                JOBS_CREATED_TOTAL.inc();
                StatusCode::CREATED
            };
            Ok((
                status,
                Json(SubmitResponse {
                    deduped: outcome.deduped,
                    job: JobResponse::from(outcome.job),
                }),
            ))
        }
        Err(SubmitError::InvalidUrl(url)) => Err(error_json(
            StatusCode::BAD_REQUEST,
            format!("Invalid source URL: {}", url),
        )),
        Err(SubmitError::QuotaExceeded) => {
            JOBS_QUOTA_REJECTED_TOTAL.inc();
            Err(error_json(
                StatusCode::TOO_MANY_REQUESTS,
                "Daily download limit reached",
            ))
        }
    }
}

/// List the caller's jobs, most recent first
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> Json<ListJobsResponse> {
    let jobs = state
        .registry()
        .list_for_user(&user)
        .await
        .into_iter()
        .map(JobResponse::from)
        .collect();
    Json(ListJobsResponse { jobs })
}

/// Get a job by ID
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<JobResponse>, (StatusCode, Json<JobErrorResponse>)> {
    let job = find_owned(&state, &user, &id).await?;
    Ok(Json(JobResponse::from(job)))
}

/// Cancel a running job
pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<JobResponse>, (StatusCode, Json<JobErrorResponse>)> {
    find_owned(&state, &user, &id).await?;

    match state.registry().cancel(&id).await {
        Ok(job) => Ok(Json(JobResponse::from(job))),
        Err(RegistryError::NotRunning) => Err(error_json(
            StatusCode::CONFLICT,
            "Job is not running",
        )),
        Err(RegistryError::NotFound) => Err(error_json(StatusCode::NOT_FOUND, "Job not found")),
    }
}

/// Stream the completed output file as an attachment
pub async fn download_file(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<Response, (StatusCode, Json<JobErrorResponse>)> {
    let job = find_owned(&state, &user, &id).await?;

    if job.status != JobStatus::Completed {
        return Err(error_json(
            StatusCode::CONFLICT,
            "Job has not completed",
        ));
    }
    let output_path = job.output_path.ok_or_else(|| {
        error_json(StatusCode::CONFLICT, "Job has no output file")
    })?;

    let file = tokio::fs::File::open(&output_path)
        .await
        .map_err(|_| error_json(StatusCode::GONE, "Output file no longer available"))?;
    let metadata = file
        .metadata()
        .await
        .map_err(|_| error_json(StatusCode::GONE, "Output file no longer available"))?;

    let filename = job.filename.unwrap_or_else(|| "download.mp4".to_string());
    let disposition = format!("attachment; filename=\"{}\"", filename);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "video/mp4")
        .header(header::CONTENT_LENGTH, metadata.len())
        .header(header::CONTENT_DISPOSITION, disposition)
        .body(Body::from_stream(ReaderStream::new(file)))
        .map_err(|_| {
            error_json(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to build response",
            )
        })
}

/// Resolve a job by id, enforcing ownership: unknown ids are 404,
/// someone else's jobs are 403.
async fn find_owned(
    state: &Arc<AppState>,
    user: &str,
    id: &str,
) -> Result<Job, (StatusCode, Json<JobErrorResponse>)> {
    let job = state
        .registry()
        .get(id)
        .await
        .ok_or_else(|| error_json(StatusCode::NOT_FOUND, "Job not found"))?;
    if job.user != user {
        return Err(error_json(StatusCode::FORBIDDEN, "Not your job"));
    }
    Ok(job)
}

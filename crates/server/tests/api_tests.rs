//! In-process API tests covering the job and proxy endpoints.

mod common;

use axum::http::StatusCode;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::json;
use vidfetch_core::proxy::ProxyContext;
use vidfetch_core::{AuthConfig, AuthMethod, QuotaConfig};

use common::{TestConfig, TestFixture};

// =============================================================================
// Basic endpoints
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let fixture = TestFixture::new().await;
    let response = fixture.get("/api/v1/health").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "ok");
}

#[tokio::test]
async fn test_config_endpoint_redacts_api_key() {
    let fixture = TestFixture::with_config(TestConfig {
        auth: Some(AuthConfig {
            method: AuthMethod::ApiKey,
            api_key: Some("super-secret".to_string()),
        }),
        ..Default::default()
    })
    .await;

    let response = fixture.get("/api/v1/config").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["auth"]["method"], "api_key");
    assert_eq!(response.body["auth"]["api_key_configured"], true);
    assert!(!response.body.to_string().contains("super-secret"));
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let fixture = TestFixture::new().await;
    let response = fixture.get("/api/v1/metrics").await;
    assert_eq!(response.status, StatusCode::OK);
}

// =============================================================================
// Authentication
// =============================================================================

#[tokio::test]
async fn test_jobs_require_auth_with_api_key() {
    let fixture = TestFixture::with_config(TestConfig {
        auth: Some(AuthConfig {
            method: AuthMethod::ApiKey,
            api_key: Some("secret".to_string()),
        }),
        ..Default::default()
    })
    .await;

    let response = fixture.get("/api/v1/jobs").await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);

    // Health stays open
    let response = fixture.get("/api/v1/health").await;
    assert_eq!(response.status, StatusCode::OK);
}

// =============================================================================
// Job lifecycle
// =============================================================================

#[tokio::test]
async fn test_submit_invalid_url_rejected() {
    let fixture = TestFixture::new().await;
    let response = fixture
        .post("/api/v1/jobs", json!({"url": "not a url", "title": "X"}))
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_submit_creates_job() {
    let fixture = TestFixture::new().await;
    let response = fixture
        .post(
            "/api/v1/jobs",
            json!({"url": "https://cdn.example.com/show.m3u8", "title": "Show"}),
        )
        .await;
    assert_eq!(response.status, StatusCode::CREATED);
    assert_eq!(response.body["deduped"], false);
    assert!(response.body["id"].as_str().is_some());

    // With a nonexistent ffmpeg the job fails quickly but stays listed
    let id = response.body["id"].as_str().unwrap().to_string();
    let terminal = fixture.wait_terminal(&id).await;
    assert_eq!(terminal["status"], "failed");
    assert!(terminal["error"].as_str().is_some());
}

#[tokio::test]
async fn test_resubmit_running_job_dedups() {
    let fixture = TestFixture::with_config(TestConfig {
        blocking_ffmpeg: true,
        ..Default::default()
    })
    .await;
    let first = fixture
        .post(
            "/api/v1/jobs",
            json!({"url": "https://cdn.example.com/a.mp4", "title": "A"}),
        )
        .await;
    assert_eq!(first.status, StatusCode::CREATED);

    let second = fixture
        .post(
            "/api/v1/jobs",
            json!({"url": "https://cdn.example.com/a.mp4", "title": "A"}),
        )
        .await;
    assert_eq!(second.status, StatusCode::OK);
    assert_eq!(second.body["deduped"], true);
    assert_eq!(first.body["id"], second.body["id"]);

    // Release the stalled transcode
    let id = first.body["id"].as_str().unwrap().to_string();
    fixture.delete(&format!("/api/v1/jobs/{}", id)).await;
}

#[tokio::test]
async fn test_cancel_running_job_via_api() {
    let fixture = TestFixture::with_config(TestConfig {
        blocking_ffmpeg: true,
        ..Default::default()
    })
    .await;
    let created = fixture
        .post(
            "/api/v1/jobs",
            json!({"url": "https://cdn.example.com/g.mp4", "title": "G"}),
        )
        .await;
    let id = created.body["id"].as_str().unwrap().to_string();

    let response = fixture.delete(&format!("/api/v1/jobs/{}", id)).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "failed");
    assert_eq!(response.body["error"], "Canceled");
}

#[tokio::test]
async fn test_list_jobs_scoped_to_user() {
    let fixture = TestFixture::new().await;
    fixture
        .post(
            "/api/v1/jobs",
            json!({"url": "https://cdn.example.com/b.m3u8", "title": "B"}),
        )
        .await;

    let response = fixture.get("/api/v1/jobs").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["jobs"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_get_unknown_job_not_found() {
    let fixture = TestFixture::new().await;
    let response = fixture.get("/api/v1/jobs/no-such-job").await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cancel_terminal_job_conflicts() {
    let fixture = TestFixture::new().await;
    let created = fixture
        .post(
            "/api/v1/jobs",
            json!({"url": "https://cdn.example.com/c.m3u8", "title": "C"}),
        )
        .await;
    let id = created.body["id"].as_str().unwrap().to_string();
    fixture.wait_terminal(&id).await;

    let response = fixture.delete(&format!("/api/v1/jobs/{}", id)).await;
    assert_eq!(response.status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_download_before_completion_conflicts() {
    let fixture = TestFixture::new().await;
    let created = fixture
        .post(
            "/api/v1/jobs",
            json!({"url": "https://cdn.example.com/d.m3u8", "title": "D"}),
        )
        .await;
    let id = created.body["id"].as_str().unwrap().to_string();
    fixture.wait_terminal(&id).await;

    let response = fixture.get(&format!("/api/v1/jobs/{}/file", id)).await;
    assert_eq!(response.status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_quota_limits_submissions() {
    let fixture = TestFixture::with_config(TestConfig {
        quota: Some(QuotaConfig {
            enabled: true,
            limit_per_day: 1,
        }),
        ..Default::default()
    })
    .await;

    let first = fixture
        .post(
            "/api/v1/jobs",
            json!({"url": "https://cdn.example.com/q1.m3u8", "title": "Q1"}),
        )
        .await;
    assert_eq!(first.status, StatusCode::CREATED);

    let second = fixture
        .post(
            "/api/v1/jobs",
            json!({"url": "https://cdn.example.com/q2.m3u8", "title": "Q2"}),
        )
        .await;
    assert_eq!(second.status, StatusCode::TOO_MANY_REQUESTS);
}

// =============================================================================
// Segment proxy
// =============================================================================

#[tokio::test]
async fn test_proxy_rejects_unknown_token() {
    let fixture = TestFixture::new().await;
    let target = URL_SAFE_NO_PAD.encode("https://cdn.example.com/seg1.ts");
    let response = fixture
        .get(&format!(
            "/api/v1/proxy/segment?token=bogus&url={}",
            target
        ))
        .await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_proxy_rejects_private_target() {
    let fixture = TestFixture::new().await;
    let token = fixture
        .state
        .tokens()
        .issue(&ProxyContext::default())
        .await;
    let target = URL_SAFE_NO_PAD.encode("http://169.254.1.1/seg1.ts");
    let response = fixture
        .get(&format!(
            "/api/v1/proxy/segment?token={}&url={}",
            token, target
        ))
        .await;
    assert_eq!(response.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_proxy_rejects_image_path_without_flag() {
    let fixture = TestFixture::new().await;
    let token = fixture
        .state
        .tokens()
        .issue(&ProxyContext::default())
        .await;
    let target = URL_SAFE_NO_PAD.encode("https://cdn.example.com/seg1.jpg");
    let response = fixture
        .get(&format!(
            "/api/v1/proxy/segment?token={}&url={}",
            token, target
        ))
        .await;
    assert_eq!(response.status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_proxy_rejects_undecodable_target() {
    let fixture = TestFixture::new().await;
    let token = fixture
        .state
        .tokens()
        .issue(&ProxyContext::default())
        .await;
    let response = fixture
        .get(&format!(
            "/api/v1/proxy/segment?token={}&url=%20not%20a%20url",
            token
        ))
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

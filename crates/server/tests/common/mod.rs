//! Common test utilities for in-process API testing.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use vidfetch_core::proxy::ProxyTokenStore;
use vidfetch_core::{
    create_authenticator, AuthConfig, AuthMethod, Authenticator, CacheStore, Config,
    DownloadDriver, FetcherConfig, FfmpegRunner, JobRegistry, JobService, MemoryCache,
    PlaylistResolver, QuotaConfig, QuotaManager, RegistryConfig, ResolverConfig, SegmentFetcher,
    TranscoderConfig,
};
use vidfetch_server::api::create_router;
use vidfetch_server::state::AppState;

/// In-process server fixture.
///
/// Builds the full router over an in-memory cache. By default ffmpeg
/// points at a nonexistent binary so submitted jobs fail fast without
/// ever touching the network; `blocking_ffmpeg` swaps in a stalling
/// script to hold jobs in a running state instead.
pub struct TestFixture {
    pub router: Router,
    pub state: Arc<AppState>,
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

/// Fixture knobs
#[derive(Default)]
pub struct TestConfig {
    pub auth: Option<AuthConfig>,
    pub quota: Option<QuotaConfig>,
    /// Replace ffmpeg with a script that never finishes, keeping
    /// submitted jobs active until cancelled.
    pub blocking_ffmpeg: bool,
}

impl TestFixture {
    pub async fn new() -> Self {
        Self::with_config(TestConfig::default()).await
    }

    pub async fn with_config(test_config: TestConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");

        let ffmpeg_path = if test_config.blocking_ffmpeg {
            let script = temp_dir.path().join("ffmpeg-stall.sh");
            std::fs::write(&script, "#!/bin/sh\nsleep 30\n").expect("Failed to write script");
            let mut perms = std::fs::metadata(&script)
                .expect("Failed to stat script")
                .permissions();
            std::os::unix::fs::PermissionsExt::set_mode(&mut perms, 0o755);
            std::fs::set_permissions(&script, perms).expect("Failed to chmod script");
            script.to_string_lossy().to_string()
        } else {
            "/nonexistent/ffmpeg".to_string()
        };

        let config = Config {
            auth: test_config.auth.unwrap_or(AuthConfig {
                method: AuthMethod::None,
                api_key: None,
            }),
            server: Default::default(),
            transcoder: TranscoderConfig {
                ffmpeg_path,
                ..Default::default()
            },
            fetcher: FetcherConfig::default(),
            resolver: ResolverConfig::default(),
            registry: RegistryConfig {
                temp_root: temp_dir.path().to_path_buf(),
                ..Default::default()
            },
            quota: test_config.quota.unwrap_or_default(),
            proxy: Default::default(),
            users: Vec::new(),
        };

        let cache: Arc<dyn CacheStore> = Arc::new(MemoryCache::new());
        let authenticator: Arc<dyn Authenticator> =
            Arc::from(create_authenticator(&config.auth).expect("Failed to create authenticator"));

        let tokens = ProxyTokenStore::new(Arc::clone(&cache), config.proxy.clone());
        let driver = Arc::new(DownloadDriver::new(
            PlaylistResolver::new(config.resolver.clone()),
            SegmentFetcher::new(config.fetcher.clone()),
            FfmpegRunner::new(config.transcoder.clone()),
            tokens.clone(),
            config.transcoder.clone(),
        ));
        let registry = Arc::new(JobRegistry::new(
            Arc::clone(&cache),
            config.registry.clone(),
        ));
        let quota = QuotaManager::new(Arc::clone(&cache), config.quota.clone());
        let jobs = Arc::new(JobService::new(registry, driver, quota));

        let state = Arc::new(AppState::new(config, authenticator, jobs, tokens));
        let router = create_router(Arc::clone(&state));

        Self {
            router,
            state,
            temp_dir,
        }
    }

    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    pub async fn delete(&self, path: &str) -> TestResponse {
        self.request("DELETE", path, None).await
    }

    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let builder = Request::builder().method(method).uri(path);
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .expect("Failed to build request"),
            None => builder.body(Body::empty()).expect("Failed to build request"),
        };

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Request failed");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to read body")
            .to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::String(
                String::from_utf8_lossy(&bytes).to_string(),
            ))
        };

        TestResponse { status, body }
    }

    /// Poll a job until it reaches a terminal status.
    pub async fn wait_terminal(&self, job_id: &str) -> Value {
        for _ in 0..100 {
            let response = self.get(&format!("/api/v1/jobs/{}", job_id)).await;
            let status = response.body["status"].as_str().unwrap_or("").to_string();
            if status == "completed" || status == "failed" {
                return response.body;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        panic!("Job {} never reached a terminal status", job_id);
    }
}

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::middleware::{auth_middleware, metrics_middleware};
use super::{handlers, jobs, proxy};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Job routes require an authenticated caller
    let job_routes = Router::new()
        .route("/jobs", post(jobs::submit_job))
        .route("/jobs", get(jobs::list_jobs))
        .route("/jobs/{id}", get(jobs::get_job))
        .route("/jobs/{id}", delete(jobs::cancel_job))
        .route("/jobs/{id}/file", get(jobs::download_file))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    // The segment proxy is gated by its own token since ffmpeg cannot
    // send API keys; health, config and metrics stay open
    let open_routes = Router::new()
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        .route("/metrics", get(handlers::metrics))
        .route("/proxy/segment", get(proxy::proxy_segment));

    let api_routes = job_routes.merge(open_routes).with_state(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
}

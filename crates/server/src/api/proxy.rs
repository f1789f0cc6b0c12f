//! Token-gated segment proxy gateway.
//!
//! ffmpeg cannot attach per-job credentials to segment requests, so
//! manifests are rewritten to route every URI through this endpoint.
//! The token query parameter resolves to a stored forwarding context;
//! the url parameter carries the real target, base64url-encoded.

use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};
use vidfetch_core::playlist::looks_like_media;
use vidfetch_core::proxy::{decode_target, has_image_extension, validate_target};

use crate::metrics::PROXY_REQUESTS_TOTAL;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SegmentParams {
    pub token: String,
    pub url: String,
}

fn reject(status: StatusCode, outcome: &str, message: &str) -> Response {
    PROXY_REQUESTS_TOTAL.with_label_values(&[outcome]).inc();
    (status, message.to_string()).into_response()
}

/// Fetch one segment on behalf of a transcode attempt.
pub async fn proxy_segment(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SegmentParams>,
    headers: HeaderMap,
) -> Response {
    let context = match state.tokens().load(&params.token).await {
        Ok(context) => context,
        Err(_) => {
            return reject(
                StatusCode::UNAUTHORIZED,
                "invalid_token",
                "Invalid or expired proxy token",
            );
        }
    };

    let target = match decode_target(&params.url) {
        Ok(target) => target,
        Err(e) => {
            debug!(error = %e, "Proxy target undecodable");
            return reject(StatusCode::BAD_REQUEST, "invalid_target", "Invalid target URL");
        }
    };

    let gateway_host = headers.get(header::HOST).and_then(|v| v.to_str().ok());
    if let Err(e) = validate_target(&target, gateway_host) {
        warn!(target = %target, error = %e, "Proxy target rejected");
        return reject(
            StatusCode::FORBIDDEN,
            "forbidden_target",
            "Target host not allowed",
        );
    }

    let image_path = has_image_extension(&target);
    if image_path && !context.allow_image_segments {
        return reject(
            StatusCode::UNPROCESSABLE_ENTITY,
            "unexpected_content",
            "Unexpected segment content-type",
        );
    }

    let mut upstream = context.headers.apply(state.http_client().get(target.clone()));
    if let Some(range) = headers.get(header::RANGE).and_then(|v| v.to_str().ok()) {
        upstream = upstream.header(header::RANGE, range);
    }

    let mut resp = match upstream.send().await {
        Ok(resp) => resp,
        Err(e) => {
            warn!(target = %target, error = %e, "Upstream fetch failed");
            return reject(StatusCode::BAD_GATEWAY, "upstream_error", "Upstream error");
        }
    };

    let upstream_status = resp.status();
    if !upstream_status.is_success() {
        debug!(target = %target, status = %upstream_status, "Upstream returned error status");
        return reject(StatusCode::BAD_GATEWAY, "upstream_error", "Upstream error");
    }

    let content_type = resp
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    if content_type.starts_with("text/html") || content_type.starts_with("application/json") {
        return reject(
            StatusCode::UNPROCESSABLE_ENTITY,
            "unexpected_content",
            "Unexpected segment content-type",
        );
    }

    // Image media types are a disguise for raw media bytes. Reclassify
    // so downstream consumers never try to render them.
    let forwarded_type = if content_type.is_empty() || content_type.starts_with("image/") {
        "application/octet-stream".to_string()
    } else {
        content_type
    };

    let content_length = resp
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let content_range = resp
        .headers()
        .get(header::CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    // Disguised segments fetched through an image path get their first
    // bytes checked against known media signatures, unless the context
    // marks them opaque (encrypted or init-mapped).
    let body = if image_path && !context.opaque_segments {
        match resp.chunk().await {
            Ok(Some(first)) => {
                if !looks_like_media(&first) {
                    return reject(
                        StatusCode::UNPROCESSABLE_ENTITY,
                        "unexpected_content",
                        "Unexpected segment content-type",
                    );
                }
                let rest = resp.bytes_stream();
                let stream =
                    futures::stream::once(async move { Ok::<_, reqwest::Error>(first) }).chain(rest);
                Body::from_stream(stream)
            }
            Ok(None) => Body::empty(),
            Err(e) => {
                warn!(target = %target, error = %e, "Upstream body read failed");
                return reject(StatusCode::BAD_GATEWAY, "upstream_error", "Upstream error");
            }
        }
    } else {
        Body::from_stream(resp.bytes_stream())
    };

    let status =
        StatusCode::from_u16(upstream_status.as_u16()).unwrap_or(StatusCode::OK);
    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, forwarded_type);
    if let Some(len) = content_length {
        builder = builder.header(header::CONTENT_LENGTH, len);
    }
    if let Some(range) = content_range {
        builder = builder.header(header::CONTENT_RANGE, range);
    }

    match builder.body(body) {
        Ok(response) => {
            PROXY_REQUESTS_TOTAL.with_label_values(&["ok"]).inc();
            response
        }
        Err(e) => {
            warn!(error = %e, "Failed to build proxy response");
            reject(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "Internal error",
            )
        }
    }
}

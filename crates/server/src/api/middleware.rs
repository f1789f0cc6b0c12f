//! Authentication and metrics middleware for API routes.

use axum::{
    body::Body,
    extract::{FromRequestParts, State},
    http::{request::Parts, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use vidfetch_core::{AuthRequest, Identity};

use crate::metrics::{
    normalize_path, AUTH_FAILURES_TOTAL, HTTP_REQUESTS_IN_FLIGHT, HTTP_REQUESTS_TOTAL,
    HTTP_REQUEST_DURATION,
};
use crate::state::AppState;

/// Metrics middleware that tracks HTTP request duration and counts.
///
/// This middleware records:
/// - Request duration (histogram)
/// - Request count (counter)
/// - Requests in flight (gauge)
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = normalize_path(request.uri().path());

    HTTP_REQUESTS_IN_FLIGHT.inc();

    let response = next.run(request).await;

    HTTP_REQUESTS_IN_FLIGHT.dec();

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    HTTP_REQUEST_DURATION
        .with_label_values(&[&method, &path, &status])
        .observe(duration);
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[&method, &path, &status])
        .inc();

    response
}

/// Authentication middleware that validates requests using the configured authenticator.
///
/// This middleware extracts credentials from request headers and validates them
/// against the authenticator configured in AppState. If authentication fails,
/// it returns a 401 Unauthorized response. Banned users are rejected with 403
/// even when their credentials are valid.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let authenticator = state.authenticator();

    // Skip auth check if using NoneAuthenticator, but still insert anonymous identity
    if authenticator.method_name() == "none" {
        let mut request = request;
        request.extensions_mut().insert(Identity {
            username: "anonymous".to_string(),
            method: "none".to_string(),
        });
        return Ok(next.run(request).await);
    }

    // Extract headers into HashMap for AuthRequest
    let headers: HashMap<String, String> = request
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_lowercase(), v.to_string()))
        })
        .collect();

    // Get source IP (default to localhost if not available)
    let source_ip = request
        .extensions()
        .get::<std::net::SocketAddr>()
        .map(|addr| addr.ip())
        .unwrap_or_else(|| std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST));

    let auth_request = AuthRequest { headers, source_ip };

    match authenticator.authenticate(&auth_request).await {
        Ok(identity) => {
            if state.config().is_banned(&identity.username) {
                AUTH_FAILURES_TOTAL.with_label_values(&["banned"]).inc();
                return Err(StatusCode::FORBIDDEN);
            }
            // Authentication successful, insert identity and continue to the handler
            let mut request = request;
            request.extensions_mut().insert(identity);
            Ok(next.run(request).await)
        }
        Err(vidfetch_core::AuthError::NotAuthenticated) => {
            // No credentials provided
            AUTH_FAILURES_TOTAL
                .with_label_values(&["not_authenticated"])
                .inc();
            Err(StatusCode::UNAUTHORIZED)
        }
        Err(vidfetch_core::AuthError::InvalidCredentials(_)) => {
            // Wrong credentials
            AUTH_FAILURES_TOTAL
                .with_label_values(&["invalid_credentials"])
                .inc();
            Err(StatusCode::UNAUTHORIZED)
        }
        Err(_) => {
            // Other auth errors (config error)
            AUTH_FAILURES_TOTAL
                .with_label_values(&["internal_error"])
                .inc();
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Extractor for the authenticated username.
///
/// Extracts the username from the Identity stored in request extensions.
/// Falls back to "anonymous" if no identity is present (shouldn't happen
/// if auth middleware is properly configured).
#[derive(Debug, Clone)]
pub struct AuthUser(pub String);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> impl Future<Output = Result<Self, Self::Rejection>> + Send {
        let username = parts
            .extensions
            .get::<Identity>()
            .map(|id| id.username.clone())
            .unwrap_or_else(|| "anonymous".to_string());
        std::future::ready(Ok(AuthUser(username)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{header, Request},
        middleware,
        routing::get,
        Router,
    };
    use std::sync::Arc;
    use tower::ServiceExt;
    use vidfetch_core::AuthConfig;

    use crate::api::test_support::test_state;

    async fn dummy_handler() -> &'static str {
        "OK"
    }

    fn app(state: Arc<AppState>) -> Router {
        Router::new()
            .route("/test", get(dummy_handler))
            .layer(middleware::from_fn_with_state(
                state.clone(),
                auth_middleware,
            ))
            .with_state(state)
    }

    #[tokio::test]
    async fn test_none_auth_allows_all() {
        let state = test_state(AuthConfig {
            method: vidfetch_core::AuthMethod::None,
            api_key: None,
        });

        let request = Request::builder().uri("/test").body(Body::empty()).unwrap();
        let response = app(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_api_key_auth_valid() {
        let state = test_state(AuthConfig {
            method: vidfetch_core::AuthMethod::ApiKey,
            api_key: Some("secret-key".to_string()),
        });

        let request = Request::builder()
            .uri("/test")
            .header(header::AUTHORIZATION, "Bearer secret-key")
            .body(Body::empty())
            .unwrap();
        let response = app(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_api_key_auth_invalid() {
        let state = test_state(AuthConfig {
            method: vidfetch_core::AuthMethod::ApiKey,
            api_key: Some("secret-key".to_string()),
        });

        let request = Request::builder()
            .uri("/test")
            .header(header::AUTHORIZATION, "Bearer wrong-key")
            .body(Body::empty())
            .unwrap();
        let response = app(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_api_key_auth_missing() {
        let state = test_state(AuthConfig {
            method: vidfetch_core::AuthMethod::ApiKey,
            api_key: Some("secret-key".to_string()),
        });

        let request = Request::builder().uri("/test").body(Body::empty()).unwrap();
        let response = app(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_x_api_key_header() {
        let state = test_state(AuthConfig {
            method: vidfetch_core::AuthMethod::ApiKey,
            api_key: Some("secret-key".to_string()),
        });

        let request = Request::builder()
            .uri("/test")
            .header("X-API-Key", "secret-key")
            .body(Body::empty())
            .unwrap();
        let response = app(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_auth_user_extractor_with_api_key() {
        use http_body_util::BodyExt;

        async fn user_handler(AuthUser(username): AuthUser) -> String {
            username
        }

        let state = test_state(AuthConfig {
            method: vidfetch_core::AuthMethod::ApiKey,
            api_key: Some("secret-key".to_string()),
        });

        let app = Router::new()
            .route("/test", get(user_handler))
            .layer(middleware::from_fn_with_state(
                state.clone(),
                auth_middleware,
            ))
            .with_state(state);

        let request = Request::builder()
            .uri("/test")
            .header(header::AUTHORIZATION, "Bearer secret-key")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let username = String::from_utf8(body.to_vec()).unwrap();
        // API key auth uses a hash of the key as username
        assert!(!username.is_empty());
        assert_ne!(username, "anonymous");
    }

    #[tokio::test]
    async fn test_banned_user_rejected() {
        use sha2::{Digest, Sha256};

        // Same username derivation as ApiKeyAuthenticator.
        let digest = Sha256::digest(b"secret-key");
        let short: String = digest.iter().take(4).map(|b| format!("{:02x}", b)).collect();
        let username = format!("key-{}", short);

        let state = crate::api::test_support::test_state_with(
            AuthConfig {
                method: vidfetch_core::AuthMethod::ApiKey,
                api_key: Some("secret-key".to_string()),
            },
            |config| {
                config.users.push(vidfetch_core::UserConfig {
                    username,
                    banned: true,
                    download_limit_enabled: false,
                    download_limit_per_day: None,
                });
            },
        );

        let request = Request::builder()
            .uri("/test")
            .header(header::AUTHORIZATION, "Bearer secret-key")
            .body(Body::empty())
            .unwrap();
        let response = app(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}

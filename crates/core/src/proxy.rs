//! Token-gated segment proxy support.
//!
//! When the transcoder cannot present custom headers itself, manifest
//! URIs are rewritten through a gateway endpoint. The gateway looks up
//! the forwarding context by an opaque token stored in the shared
//! cache, so credentials never appear in rewritten URLs.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::{Host, Url};
use uuid::Uuid;

use crate::cache::CacheStore;
use crate::headers::ForwardHeaders;
use crate::playlist::NON_MEDIA_EXTENSIONS;

/// Errors from the proxy gateway.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Token missing, expired or never issued.
    #[error("Invalid or expired proxy token")]
    InvalidToken,

    /// Target URL missing or undecodable.
    #[error("Invalid target URL: {0}")]
    InvalidTarget(String),

    /// Target host is private/loopback and not the gateway itself.
    #[error("Target host not allowed: {0}")]
    ForbiddenTarget(String),

    /// Image-extension path without the permissive context flag.
    #[error("Unexpected segment content-type")]
    UnexpectedContentType,

    /// Upstream fetch failed.
    #[error("Upstream error: {0}")]
    Upstream(String),
}

/// Proxy gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Token lifetime in seconds.
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            token_ttl_secs: default_token_ttl_secs(),
        }
    }
}

fn default_token_ttl_secs() -> u64 {
    6 * 3600
}

/// Forwarding context stored against a proxy token.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProxyContext {
    pub headers: ForwardHeaders,
    /// Allow image-extension target paths through.
    #[serde(default)]
    pub allow_image_segments: bool,
    /// Image segments are encrypted or init-mapped, skip the byte peek.
    #[serde(default)]
    pub opaque_segments: bool,
}

/// Issues and resolves proxy tokens over the shared cache.
#[derive(Clone)]
pub struct ProxyTokenStore {
    cache: Arc<dyn CacheStore>,
    config: ProxyConfig,
}

impl ProxyTokenStore {
    pub fn new(cache: Arc<dyn CacheStore>, config: ProxyConfig) -> Self {
        Self { cache, config }
    }

    fn cache_key(token: &str) -> String {
        format!("proxy:token:{}", token)
    }

    /// Create a fresh token for `context`. One token per transcode
    /// attempt, never shared across jobs.
    pub async fn issue(&self, context: &ProxyContext) -> String {
        let token = Uuid::new_v4().to_string();
        self.store(&token, context).await;
        token
    }

    /// Overwrite the context of an existing token, refreshing its TTL.
    pub async fn store(&self, token: &str, context: &ProxyContext) {
        let value = match serde_json::to_value(context) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize proxy context");
                return;
            }
        };
        if let Err(e) = self
            .cache
            .set(
                &Self::cache_key(token),
                value,
                Some(Duration::from_secs(self.config.token_ttl_secs)),
            )
            .await
        {
            tracing::warn!(error = %e, "Failed to store proxy token");
        }
    }

    pub async fn load(&self, token: &str) -> Result<ProxyContext, ProxyError> {
        let value = self
            .cache
            .get(&Self::cache_key(token))
            .await
            .map_err(|_| ProxyError::InvalidToken)?
            .ok_or(ProxyError::InvalidToken)?;
        serde_json::from_value(value).map_err(|_| ProxyError::InvalidToken)
    }

    pub async fn revoke(&self, token: &str) {
        if let Err(e) = self.cache.remove(&Self::cache_key(token)).await {
            tracing::debug!(error = %e, "Failed to revoke proxy token");
        }
    }
}

/// Decode the `url` query parameter: base64url first, raw URL second.
pub fn decode_target(raw: &str) -> Result<Url, ProxyError> {
    if let Ok(bytes) = URL_SAFE_NO_PAD.decode(raw.trim_end_matches('=')) {
        if let Ok(text) = String::from_utf8(bytes) {
            if let Ok(url) = Url::parse(&text) {
                return Ok(url);
            }
        }
    }
    Url::parse(raw).map_err(|_| ProxyError::InvalidTarget(raw.to_string()))
}

/// SSRF guard for proxied targets.
///
/// Only http/https schemes, and loopback/private/link-local hosts are
/// rejected unless the target host equals the gateway's own request
/// host (segments rewritten back through ourselves).
pub fn validate_target(target: &Url, gateway_host: Option<&str>) -> Result<(), ProxyError> {
    match target.scheme() {
        "http" | "https" => {}
        other => return Err(ProxyError::InvalidTarget(format!("scheme {}", other))),
    }

    let host = match target.host() {
        Some(host) => host,
        None => return Err(ProxyError::InvalidTarget("missing host".into())),
    };

    if let Some(gateway) = gateway_host {
        let gateway_name = gateway.rsplit_once(':').map_or(gateway, |(h, _)| h);
        if host.to_string().eq_ignore_ascii_case(gateway_name) {
            return Ok(());
        }
    }

    let restricted = match &host {
        Host::Ipv4(ip) => is_restricted_ip(&IpAddr::V4(*ip)),
        Host::Ipv6(ip) => is_restricted_ip(&IpAddr::V6(*ip)),
        Host::Domain(name) => {
            name.eq_ignore_ascii_case("localhost")
                || name
                    .parse::<IpAddr>()
                    .map(|ip| is_restricted_ip(&ip))
                    .unwrap_or(false)
        }
    };
    if restricted {
        return Err(ProxyError::ForbiddenTarget(host.to_string()));
    }
    Ok(())
}

fn is_restricted_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                || (v6.segments()[0] & 0xffc0) == 0xfe80
        }
    }
}

/// Whether the target path ends in a known image extension.
pub fn has_image_extension(target: &Url) -> bool {
    let path = target.path().to_ascii_lowercase();
    NON_MEDIA_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

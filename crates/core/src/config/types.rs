use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use crate::fetcher::FetcherConfig;
use crate::job::RegistryConfig;
use crate::playlist::ResolverConfig;
use crate::proxy::ProxyConfig;
use crate::quota::QuotaConfig;
use crate::transcoder::TranscoderConfig;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub auth: AuthConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub transcoder: TranscoderConfig,
    #[serde(default)]
    pub fetcher: FetcherConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub users: Vec<UserConfig>,
}

impl Config {
    pub fn user(&self, username: &str) -> Option<&UserConfig> {
        self.users.iter().find(|u| u.username == username)
    }

    pub fn is_banned(&self, username: &str) -> bool {
        self.user(username).map(|u| u.banned).unwrap_or(false)
    }

    /// Per-user daily limit override, when the user has one enabled.
    pub fn quota_limit_for(&self, username: &str) -> Option<u32> {
        self.user(username)
            .filter(|u| u.download_limit_enabled)
            .map(|u| u.download_limit_per_day.unwrap_or(self.quota.limit_per_day))
    }
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    "0.0.0.0".parse().unwrap()
}

fn default_port() -> u16 {
    8080
}

/// Authentication configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    pub method: AuthMethod,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    None,
    ApiKey,
}

/// Per-user settings from the config file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UserConfig {
    pub username: String,
    #[serde(default)]
    pub banned: bool,
    #[serde(default)]
    pub download_limit_enabled: bool,
    #[serde(default)]
    pub download_limit_per_day: Option<u32>,
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub auth: SanitizedAuthConfig,
    pub server: ServerConfig,
    pub transcoder: SanitizedTranscoderConfig,
    pub fetcher: FetcherConfig,
    pub quota: QuotaConfig,
    pub user_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedAuthConfig {
    pub method: String,
    pub api_key_configured: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedTranscoderConfig {
    pub ffmpeg_path: String,
    pub timeout_secs: u64,
    pub completeness_threshold: f64,
    pub prefer_proxy: bool,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            auth: SanitizedAuthConfig {
                method: match config.auth.method {
                    AuthMethod::None => "none".to_string(),
                    AuthMethod::ApiKey => "api_key".to_string(),
                },
                api_key_configured: config
                    .auth
                    .api_key
                    .as_ref()
                    .map(|k| !k.is_empty())
                    .unwrap_or(false),
            },
            server: config.server.clone(),
            transcoder: SanitizedTranscoderConfig {
                ffmpeg_path: config.transcoder.ffmpeg_path.clone(),
                timeout_secs: config.transcoder.timeout_secs,
                completeness_threshold: config.transcoder.completeness_threshold,
                prefer_proxy: config.transcoder.prefer_proxy,
            },
            fetcher: config.fetcher.clone(),
            quota: config.quota.clone(),
            user_count: config.users.len(),
        }
    }
}

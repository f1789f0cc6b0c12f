use super::{types::Config, AuthMethod, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - api_key present when auth method is api_key
/// - Transcoder and fetcher tunables are in sensible ranges
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    if matches!(config.auth.method, AuthMethod::ApiKey)
        && config.auth.api_key.as_deref().unwrap_or("").is_empty()
    {
        return Err(ConfigError::ValidationError(
            "auth.api_key must be set when auth.method is api_key".to_string(),
        ));
    }

    if !(0.0..=1.0).contains(&config.transcoder.completeness_threshold) {
        return Err(ConfigError::ValidationError(
            "transcoder.completeness_threshold must be between 0 and 1".to_string(),
        ));
    }

    if config.fetcher.concurrency == 0 {
        return Err(ConfigError::ValidationError(
            "fetcher.concurrency cannot be 0".to_string(),
        ));
    }

    if config.resolver.max_depth == 0 {
        return Err(ConfigError::ValidationError(
            "resolver.max_depth cannot be 0".to_string(),
        ));
    }

    Ok(())
}

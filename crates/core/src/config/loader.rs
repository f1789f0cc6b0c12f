//! Configuration loading.
//!
//! A TOML file provides the base layers; `VIDFETCH_` prefixed
//! environment variables override individual keys, split on `_`
//! (`VIDFETCH_SERVER_PORT=9000` overrides `server.port`).

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use std::path::Path;

use super::{types::Config, ConfigError};

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }

    let config: Config = Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed("VIDFETCH_").split("_"))
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))?;

    Ok(config)
}

/// Parse a config from a TOML string without the env layer.
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::ParseError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_minimal_config_fills_defaults() {
        let toml = r#"
[auth]
method = "none"
"#;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.server.port, 8080);
        assert!(!config.quota.enabled);
        assert!(!config.transcoder.ffmpeg_path.is_empty());
        assert!(config.users.is_empty());
    }

    #[test]
    fn test_auth_section_is_required() {
        let result = load_config_from_str("[server]\nport = 8080\n");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/vidfetch.toml"));
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
[auth]
method = "api_key"
api_key = "dl-service-key"

[server]
host = "127.0.0.1"
port = 3000

[transcoder]
ffmpeg_path = "/opt/ffmpeg/bin/ffmpeg"

[quota]
enabled = true
limit_per_day = 5
"#
        )
        .unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.host.to_string(), "127.0.0.1");
        assert_eq!(config.transcoder.ffmpeg_path, "/opt/ffmpeg/bin/ffmpeg");
        assert!(config.quota.enabled);
        assert_eq!(config.quota.limit_per_day, 5);
    }
}

//! Identity seam for the HTTP surface.

mod api_key;
mod none;
mod traits;
mod types;

pub use api_key::*;
pub use none::*;
pub use traits::*;
pub use types::*;

use crate::config::{AuthConfig, AuthMethod};

/// Build the authenticator selected by the `[auth]` config section.
pub fn create_authenticator(config: &AuthConfig) -> Result<Box<dyn Authenticator>, AuthError> {
    match config.method {
        AuthMethod::None => Ok(Box::new(NoneAuthenticator::new())),
        AuthMethod::ApiKey => match config.api_key.clone() {
            Some(key) if !key.trim().is_empty() => Ok(Box::new(ApiKeyAuthenticator::new(key))),
            _ => Err(AuthError::ConfigurationError(
                "auth.api_key is required for the api_key method".to_string(),
            )),
        },
    }
}

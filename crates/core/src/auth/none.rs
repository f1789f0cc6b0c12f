//! No-op authentication for single-user deployments.

use async_trait::async_trait;

use super::{AuthError, AuthRequest, Authenticator, Identity};

/// Authenticator that grants every request the same anonymous
/// identity.
pub struct NoneAuthenticator;

impl NoneAuthenticator {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NoneAuthenticator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Authenticator for NoneAuthenticator {
    async fn authenticate(&self, _request: &AuthRequest) -> Result<Identity, AuthError> {
        Ok(Identity {
            username: "anonymous".to_string(),
            method: "none".to_string(),
        })
    }

    fn method_name(&self) -> &'static str {
        "none"
    }
}

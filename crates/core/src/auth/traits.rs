use async_trait::async_trait;

use super::types::{AuthError, AuthRequest, Identity};

/// Resolves a request to a principal identity.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, request: &AuthRequest) -> Result<Identity, AuthError>;

    fn method_name(&self) -> &'static str;
}

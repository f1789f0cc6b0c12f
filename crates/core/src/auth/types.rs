use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use thiserror::Error;

/// Request data available to authenticators.
#[derive(Debug, Clone)]
pub struct AuthRequest {
    /// Headers with lowercase names.
    pub headers: HashMap<String, String>,
    pub source_ip: IpAddr,
}

/// The resolved principal of a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub username: String,
    /// Authentication method that produced this identity.
    pub method: String,
}

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Authentication configuration error: {0}")]
    ConfigurationError(String),
}

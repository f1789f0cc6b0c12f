use std::sync::Arc;
use vidfetch_core::proxy::ProxyTokenStore;
use vidfetch_core::{Authenticator, Config, JobRegistry, JobService, SanitizedConfig};

/// Shared application state
pub struct AppState {
    config: Config,
    authenticator: Arc<dyn Authenticator>,
    jobs: Arc<JobService>,
    tokens: ProxyTokenStore,
    client: reqwest::Client,
}

impl AppState {
    pub fn new(
        config: Config,
        authenticator: Arc<dyn Authenticator>,
        jobs: Arc<JobService>,
        tokens: ProxyTokenStore,
    ) -> Self {
        Self {
            config,
            authenticator,
            jobs,
            tokens,
            client: reqwest::Client::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn authenticator(&self) -> &dyn Authenticator {
        self.authenticator.as_ref()
    }

    pub fn jobs(&self) -> &Arc<JobService> {
        &self.jobs
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        self.jobs.registry()
    }

    pub fn tokens(&self) -> &ProxyTokenStore {
        &self.tokens
    }

    pub fn http_client(&self) -> &reqwest::Client {
        &self.client
    }
}

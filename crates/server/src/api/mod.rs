pub mod handlers;
pub mod jobs;
pub mod middleware;
pub mod proxy;
pub mod routes;

pub use routes::create_router;

#[cfg(test)]
pub mod test_support {
    use std::sync::Arc;
    use vidfetch_core::proxy::ProxyTokenStore;
    use vidfetch_core::{
        create_authenticator, AuthConfig, Authenticator, CacheStore, Config, DownloadDriver,
        FfmpegRunner, FetcherConfig, JobRegistry, JobService, MemoryCache, PlaylistResolver,
        QuotaConfig, QuotaManager, RegistryConfig, ResolverConfig, SegmentFetcher,
        TranscoderConfig,
    };

    use crate::state::AppState;

    pub fn test_config(auth: AuthConfig) -> Config {
        Config {
            auth,
            server: Default::default(),
            transcoder: TranscoderConfig {
                ffmpeg_path: "/nonexistent/ffmpeg".to_string(),
                ..Default::default()
            },
            fetcher: FetcherConfig::default(),
            resolver: ResolverConfig::default(),
            registry: RegistryConfig {
                temp_root: std::env::temp_dir().join("vidfetch-test"),
                ..Default::default()
            },
            quota: QuotaConfig::default(),
            proxy: Default::default(),
            users: Vec::new(),
        }
    }

    pub fn test_state(auth: AuthConfig) -> Arc<AppState> {
        test_state_with(auth, |_| {})
    }

    pub fn test_state_with(
        auth: AuthConfig,
        mutate: impl FnOnce(&mut Config),
    ) -> Arc<AppState> {
        let mut config = test_config(auth);
        mutate(&mut config);
        build_state(config)
    }

    pub fn build_state(config: Config) -> Arc<AppState> {
        let cache: Arc<dyn CacheStore> = Arc::new(MemoryCache::new());
        let authenticator: Arc<dyn Authenticator> =
            Arc::from(create_authenticator(&config.auth).unwrap());

        let tokens = ProxyTokenStore::new(Arc::clone(&cache), config.proxy.clone());
        let driver = Arc::new(DownloadDriver::new(
            PlaylistResolver::new(config.resolver.clone()),
            SegmentFetcher::new(config.fetcher.clone()),
            FfmpegRunner::new(config.transcoder.clone()),
            tokens.clone(),
            config.transcoder.clone(),
        ));
        let registry = Arc::new(JobRegistry::new(
            Arc::clone(&cache),
            config.registry.clone(),
        ));
        let quota = QuotaManager::new(Arc::clone(&cache), config.quota.clone());
        let jobs = Arc::new(JobService::new(registry, driver, quota));

        Arc::new(AppState::new(config, authenticator, jobs, tokens))
    }
}

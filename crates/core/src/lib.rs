pub mod auth;
pub mod cache;
pub mod config;
pub mod fetcher;
pub mod headers;
pub mod job;
pub mod playlist;
pub mod proxy;
pub mod quota;
pub mod transcoder;

pub use auth::{
    create_authenticator, ApiKeyAuthenticator, AuthError, AuthRequest, Authenticator, Identity,
    NoneAuthenticator,
};
pub use cache::{CacheError, CacheStore, MemoryCache};
pub use config::{
    load_config, load_config_from_str, validate_config, AuthConfig, AuthMethod, Config,
    ConfigError, SanitizedConfig, ServerConfig, UserConfig,
};
pub use fetcher::{FetchError, FetcherConfig, FetchedPlaylist, SegmentFetcher};
pub use headers::{parse_source_param, ForwardHeaders};
pub use job::{
    Job, JobProgress, JobRegistry, JobService, JobStatus, JobUpdate, RegistryConfig, RegistryError,
    SubmitError, SubmitOutcome, SubmitRequest,
};
pub use playlist::{LineRole, MediaPlaylist, PlaylistError, PlaylistResolver, ResolverConfig};
pub use proxy::{ProxyConfig, ProxyContext, ProxyError, ProxyTokenStore};
pub use quota::{QuotaConfig, QuotaDecision, QuotaManager};
pub use transcoder::{
    DownloadDriver, FfmpegRunner, TranscodeArgs, TranscoderConfig, TranscoderError,
};

pub mod loader;
pub mod schema;

pub use loader::{load_config, load_config_from_str};
pub use schema::{
    AuthConfig, CircuitBreakerConfig, Config, FeatureWeights, InboxConfig, QueuePolicy,
    QueuesConfig, RankingConfig, RateLimitConfig, WorkersConfig, YouTubeConfig,
};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub inbox: InboxConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub youtube: YouTubeConfig,
    #[serde(rename = "circuitBreaker", default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub ranking: RankingConfig,
    #[serde(default)]
    pub queues: QueuesConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "tubesift.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxConfig {
    /// How many recent messages a first sync (no stored cursor) may pull.
    #[serde(default = "default_initial_sync_limit")]
    pub initial_sync_limit: u32,
    #[serde(default = "default_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Base delay for in-process retry backoff, in milliseconds.
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
}

fn default_initial_sync_limit() -> u32 {
    50
}

fn default_attempts() -> u32 {
    3
}

fn default_page_size() -> u32 {
    100
}

fn default_retry_base_ms() -> u64 {
    1000
}

impl Default for InboxConfig {
    fn default() -> Self {
        Self {
            initial_sync_limit: default_initial_sync_limit(),
            max_attempts: default_attempts(),
            page_size: default_page_size(),
            retry_base_ms: default_retry_base_ms(),
        }
    }
}

/// OAuth client + at-rest encryption settings. Secret material is never
/// placed in the config file directly; only env var names are.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_client_id_env_var")]
    pub client_id_env_var: String,
    #[serde(default = "default_client_secret_env_var")]
    pub client_secret_env_var: String,
    /// Env var holding the 32-byte (base64) key for credential encryption.
    #[serde(default = "default_encryption_key_env_var")]
    pub encryption_key_env_var: String,
}

fn default_token_url() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

fn default_client_id_env_var() -> String {
    "TUBESIFT_OAUTH_CLIENT_ID".to_string()
}

fn default_client_secret_env_var() -> String {
    "TUBESIFT_OAUTH_CLIENT_SECRET".to_string()
}

fn default_encryption_key_env_var() -> String {
    "TUBESIFT_CREDENTIAL_KEY".to_string()
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_url: default_token_url(),
            client_id_env_var: default_client_id_env_var(),
            client_secret_env_var: default_client_secret_env_var(),
            encryption_key_env_var: default_encryption_key_env_var(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YouTubeConfig {
    /// Max video ids per videos.list call. The upstream caps this at 50.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
    #[serde(default = "default_quota_units_per_day")]
    pub quota_units_per_day: u64,
    #[serde(default = "default_api_key_env_var")]
    pub api_key_env_var: String,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    /// Requeue delay for jobs stalled on an exhausted quota.
    #[serde(default = "default_quota_retry_delay_secs")]
    pub quota_retry_delay_secs: u64,
}

fn default_batch_size() -> usize {
    50
}

fn default_requests_per_second() -> u32 {
    10
}

fn default_quota_units_per_day() -> u64 {
    10_000
}

fn default_api_key_env_var() -> String {
    "YOUTUBE_API_KEY".to_string()
}

fn default_quota_retry_delay_secs() -> u64 {
    3600
}

impl Default for YouTubeConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            requests_per_second: default_requests_per_second(),
            quota_units_per_day: default_quota_units_per_day(),
            api_key_env_var: default_api_key_env_var(),
            retry_base_ms: default_retry_base_ms(),
            quota_retry_delay_secs: default_quota_retry_delay_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerConfig {
    /// Consecutive upstream failures before the breaker opens.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_reset_timeout_ms() -> u64 {
    60_000
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout_ms: default_reset_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingConfig {
    #[serde(default = "default_half_life_days")]
    pub freshness_half_life_days: f64,
    #[serde(default = "default_watch_now_threshold")]
    pub watch_now_threshold: f64,
    #[serde(default = "default_save_threshold")]
    pub save_threshold: f64,
    #[serde(default)]
    pub feature_weights: FeatureWeights,
}

fn default_half_life_days() -> f64 {
    30.0
}

fn default_watch_now_threshold() -> f64 {
    0.7
}

fn default_save_threshold() -> f64 {
    0.4
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            freshness_half_life_days: default_half_life_days(),
            watch_now_threshold: default_watch_now_threshold(),
            save_threshold: default_save_threshold(),
            feature_weights: FeatureWeights::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureWeights {
    #[serde(default = "default_sender_weight")]
    pub sender: f64,
    #[serde(default = "default_thread_weight")]
    pub thread: f64,
    #[serde(default = "default_freshness_weight")]
    pub freshness: f64,
    #[serde(default = "default_topic_weight")]
    pub topic: f64,
    #[serde(default = "default_noise_penalty_weight")]
    pub noise_penalty: f64,
}

fn default_sender_weight() -> f64 {
    0.3
}

fn default_thread_weight() -> f64 {
    0.2
}

fn default_freshness_weight() -> f64 {
    0.2
}

fn default_topic_weight() -> f64 {
    0.2
}

fn default_noise_penalty_weight() -> f64 {
    0.1
}

impl Default for FeatureWeights {
    fn default() -> Self {
        Self {
            sender: default_sender_weight(),
            thread: default_thread_weight(),
            freshness: default_freshness_weight(),
            topic: default_topic_weight(),
            noise_penalty: default_noise_penalty_weight(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuesConfig {
    #[serde(default = "default_email_process_policy")]
    pub email_process: QueuePolicy,
    #[serde(default = "default_enrich_policy")]
    pub enrich: QueuePolicy,
    #[serde(default = "default_rank_compute_policy")]
    pub rank_compute: QueuePolicy,
    #[serde(default = "default_inbox_sync_policy")]
    pub inbox_sync: QueuePolicy,
}

fn default_email_process_policy() -> QueuePolicy {
    QueuePolicy {
        attempts: 3,
        concurrency: 5,
        backoff_base_secs: 2,
        rate_limit: None,
    }
}

fn default_enrich_policy() -> QueuePolicy {
    QueuePolicy {
        attempts: 3,
        concurrency: 3,
        backoff_base_secs: 2,
        rate_limit: Some(RateLimitConfig {
            max_jobs: 10,
            window_secs: 1,
        }),
    }
}

fn default_rank_compute_policy() -> QueuePolicy {
    QueuePolicy {
        attempts: 3,
        concurrency: 1,
        backoff_base_secs: 2,
        rate_limit: None,
    }
}

fn default_inbox_sync_policy() -> QueuePolicy {
    QueuePolicy {
        attempts: 3,
        concurrency: 2,
        backoff_base_secs: 2,
        rate_limit: None,
    }
}

impl Default for QueuesConfig {
    fn default() -> Self {
        Self {
            email_process: default_email_process_policy(),
            enrich: default_enrich_policy(),
            rank_compute: default_rank_compute_policy(),
            inbox_sync: default_inbox_sync_policy(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuePolicy {
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
}

fn default_concurrency() -> usize {
    1
}

fn default_backoff_base_secs() -> u64 {
    2
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            concurrency: default_concurrency(),
            backoff_base_secs: default_backoff_base_secs(),
            rate_limit: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitConfig {
    pub max_jobs: u32,
    pub window_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkersConfig {
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
    /// Seconds before an unacknowledged running job is redelivered.
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Seconds between periodic inbox-sync enqueues per user.
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
}

fn default_drain_timeout_secs() -> u64 {
    20
}

fn default_visibility_timeout_secs() -> u64 {
    300
}

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_sync_interval_secs() -> u64 {
    300
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            drain_timeout_secs: default_drain_timeout_secs(),
            visibility_timeout_secs: default_visibility_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            sync_interval_secs: default_sync_interval_secs(),
        }
    }
}

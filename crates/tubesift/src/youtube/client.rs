//! The enrichment client: mediates between a fan-out-heavy pipeline and a
//! quota-limited upstream.
//!
//! `get_metadata` order of operations: cache probe, breaker check, then
//! batched fetches (each guarded by the daily quota counter and the shared
//! request rate limit) with bounded retries, and a write-through cache on
//! the way out.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::YouTubeConfig;
use crate::kv::{keys, KvStore, METADATA_TTL};

use super::breaker::CircuitBreaker;
use super::duration::parse_period_seconds;
use super::{description_keywords, EnrichError, VideoMetadata};

const API_NAME: &str = "youtube";
/// Attempts per batch, counting the first.
const MAX_BATCH_ATTEMPTS: u32 = 3;

#[derive(Debug)]
pub enum VideoApiError {
    RateLimited { retry_after_secs: Option<u64> },
    QuotaExceeded,
    Transient(String),
}

/// One item of a videos.list response, parts snippet + contentDetails +
/// statistics.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoItem {
    pub id: String,
    #[serde(default)]
    pub snippet: Option<Snippet>,
    #[serde(default)]
    pub content_details: Option<ContentDetails>,
    #[serde(default)]
    pub statistics: Option<Statistics>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snippet {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub channel_title: String,
    #[serde(default)]
    pub published_at: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category_id: String,
    #[serde(default)]
    pub thumbnails: Option<Thumbnails>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Thumbnails {
    #[serde(default)]
    pub medium: Option<Thumbnail>,
    #[serde(default, rename = "default")]
    pub fallback: Option<Thumbnail>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Thumbnail {
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentDetails {
    #[serde(default)]
    pub duration: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    #[serde(default)]
    pub view_count: Option<String>,
    #[serde(default)]
    pub like_count: Option<String>,
}

/// The HTTP seam, kept minimal so tests can script it.
#[async_trait]
pub trait VideoApi: Send + Sync {
    /// Lists up to 50 videos by id.
    async fn list_videos(&self, ids: &[String]) -> Result<Vec<VideoItem>, VideoApiError>;
}

#[derive(Debug, Deserialize)]
struct VideoListDto {
    #[serde(default)]
    items: Vec<VideoItem>,
}

pub struct HttpVideoApi {
    http: Client,
    base_url: String,
    api_key: SecretString,
}

impl HttpVideoApi {
    const DEFAULT_BASE_URL: &'static str = "https://www.googleapis.com/youtube/v3";

    pub fn new(api_key: SecretString) -> Self {
        Self::with_base_url(Self::DEFAULT_BASE_URL, api_key)
    }

    pub fn with_base_url(base_url: &str, api_key: SecretString) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client with static config");
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

#[async_trait]
impl VideoApi for HttpVideoApi {
    async fn list_videos(&self, ids: &[String]) -> Result<Vec<VideoItem>, VideoApiError> {
        let response = self
            .http
            .get(format!("{}/videos", self.base_url))
            .query(&[
                ("part", "snippet,contentDetails,statistics"),
                ("id", &ids.join(",")),
                ("key", self.api_key.expose_secret()),
            ])
            .send()
            .await
            .map_err(|e| VideoApiError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            let dto: VideoListDto = response
                .json()
                .await
                .map_err(|e| VideoApiError::Transient(e.to_string()))?;
            return Ok(dto.items);
        }

        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let body = response.text().await.unwrap_or_default();

        Err(match status {
            StatusCode::TOO_MANY_REQUESTS => VideoApiError::RateLimited {
                retry_after_secs: retry_after,
            },
            StatusCode::FORBIDDEN if body.contains("quotaExceeded") => {
                VideoApiError::QuotaExceeded
            }
            s => VideoApiError::Transient(format!("{}: {}", s, body)),
        })
    }
}

pub struct YouTubeClient {
    api: Arc<dyn VideoApi>,
    kv: Arc<dyn KvStore>,
    breaker: CircuitBreaker,
    config: YouTubeConfig,
}

impl YouTubeClient {
    pub fn new(
        api: Arc<dyn VideoApi>,
        kv: Arc<dyn KvStore>,
        breaker: CircuitBreaker,
        config: YouTubeConfig,
    ) -> Self {
        Self {
            api,
            kv,
            breaker,
            config,
        }
    }

    /// Resolves metadata for the given ids. Cache hits cost nothing
    /// upstream; misses are fetched in batches of at most
    /// `youtube.batchSize` and written through to the cache with a 7-day
    /// TTL. Ids unknown upstream are simply absent from the result.
    pub async fn get_metadata(
        &self,
        video_ids: &[String],
    ) -> Result<HashMap<String, VideoMetadata>, EnrichError> {
        let mut found = HashMap::new();
        let mut misses = Vec::new();

        for id in video_ids {
            if found.contains_key(id) || misses.contains(id) {
                continue;
            }
            match self.cache_get(id) {
                Some(meta) => {
                    found.insert(id.clone(), meta);
                }
                None => misses.push(id.clone()),
            }
        }

        if misses.is_empty() {
            return Ok(found);
        }

        self.breaker.check(Utc::now())?;

        for batch in misses.chunks(self.config.batch_size) {
            let items = self.fetch_batch(batch).await?;
            let now = Utc::now();
            for item in items {
                let Some(meta) = parse_item(item, now) else {
                    continue;
                };
                self.cache_put(&meta);
                found.insert(meta.video_id.clone(), meta);
            }
        }

        Ok(found)
    }

    fn cache_get(&self, video_id: &str) -> Option<VideoMetadata> {
        let raw = self.kv.get(&keys::video_metadata(video_id))?;
        match serde_json::from_str(&raw) {
            Ok(meta) => Some(meta),
            Err(e) => {
                // Treat an unreadable entry as a miss and let the fetch
                // overwrite it.
                warn!(video_id, "discarding corrupt cache entry: {}", e);
                None
            }
        }
    }

    fn cache_put(&self, meta: &VideoMetadata) {
        match serde_json::to_string(meta) {
            Ok(json) => {
                self.kv
                    .put(&keys::video_metadata(&meta.video_id), json, Some(METADATA_TTL))
            }
            Err(e) => warn!(video_id = %meta.video_id, "failed to serialize metadata: {}", e),
        }
    }

    async fn fetch_batch(&self, ids: &[String]) -> Result<Vec<VideoItem>, EnrichError> {
        self.consume_quota_unit()?;
        self.throttle().await;

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.api.list_videos(ids).await {
                Ok(items) => {
                    debug!(requested = ids.len(), returned = items.len(), "batch fetched");
                    self.breaker.record_success();
                    return Ok(items);
                }
                Err(VideoApiError::QuotaExceeded) => {
                    // The upstream's own verdict overrides our local
                    // accounting; saturate the local counter too.
                    warn!("upstream reports quota exhausted");
                    return Err(EnrichError::QuotaExceeded);
                }
                Err(VideoApiError::RateLimited { retry_after_secs }) => {
                    // 429s do not count against the breaker.
                    if attempt >= MAX_BATCH_ATTEMPTS {
                        return Err(EnrichError::TransientUpstream(
                            "rate limited after retries".to_string(),
                        ));
                    }
                    let delay = match retry_after_secs {
                        Some(secs) => Duration::from_secs(secs),
                        None => self.backoff(attempt),
                    };
                    warn!(attempt, delay_ms = delay.as_millis() as u64, "rate limited, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(VideoApiError::Transient(e)) => {
                    if attempt >= MAX_BATCH_ATTEMPTS {
                        self.breaker.record_failure(Utc::now());
                        return Err(EnrichError::TransientUpstream(e));
                    }
                    let delay = self.backoff(attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "transient upstream failure, retrying: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// 2^attempt × base (base is 1000 ms in production).
    fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.config.retry_base_ms.saturating_mul(1 << attempt))
    }

    /// One videos.list call costs one quota unit; the counter window rolls
    /// over at UTC midnight with the upstream's budget.
    fn consume_quota_unit(&self) -> Result<(), EnrichError> {
        let now = Utc::now();
        let window = Duration::from_secs(seconds_until_utc_midnight(now));
        let units = self
            .kv
            .incr(&keys::rate_limit(API_NAME, "quota_units"), window);
        if units > self.config.quota_units_per_day as i64 {
            warn!(units, budget = self.config.quota_units_per_day, "daily quota exhausted");
            return Err(EnrichError::QuotaExceeded);
        }
        Ok(())
    }

    /// Shared fixed-window request limiter across all enrichment workers.
    async fn throttle(&self) {
        let window = Duration::from_secs(1);
        loop {
            let count = self.kv.incr(&keys::rate_limit(API_NAME, "global"), window);
            if count <= self.config.requests_per_second as i64 {
                return;
            }
            tokio::time::sleep(window).await;
        }
    }
}

fn parse_item(item: VideoItem, now: DateTime<Utc>) -> Option<VideoMetadata> {
    let snippet = item.snippet?;
    let published_at = DateTime::parse_from_rfc3339(&snippet.published_at)
        .ok()?
        .with_timezone(&Utc);
    let duration_seconds = item
        .content_details
        .and_then(|cd| cd.duration)
        .and_then(|d| parse_period_seconds(&d))
        .unwrap_or(0);
    let statistics = item.statistics.unwrap_or_default();
    let thumbnail_url = snippet
        .thumbnails
        .and_then(|t| t.medium.or(t.fallback))
        .map(|t| t.url)
        .unwrap_or_default();

    Some(VideoMetadata {
        video_id: item.id,
        title: snippet.title,
        channel_id: snippet.channel_id,
        channel_title: snippet.channel_title,
        published_at,
        duration_seconds,
        category: snippet.category_id,
        description_keywords: description_keywords(&snippet.description),
        thumbnail_url,
        view_count: parse_count(statistics.view_count.as_deref()),
        like_count: parse_count(statistics.like_count.as_deref()),
        fetched_at: now,
    })
}

fn parse_count(raw: Option<&str>) -> u64 {
    raw.and_then(|v| v.parse().ok()).unwrap_or(0)
}

fn seconds_until_utc_midnight(now: DateTime<Utc>) -> u64 {
    let midnight = (now + chrono::Duration::days(1))
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .expect("midnight exists")
        .and_utc();
    midnight.signed_duration_since(now).num_seconds().max(1) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scripted fake: pops one response per call, counting calls.
    struct ScriptedApi {
        calls: AtomicUsize,
        responses: Mutex<VecDeque<Result<Vec<VideoItem>, VideoApiError>>>,
    }

    impl ScriptedApi {
        fn new(responses: Vec<Result<Vec<VideoItem>, VideoApiError>>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                responses: Mutex::new(responses.into()),
            })
        }

        /// Always answers with items echoing the requested ids.
        fn echoing() -> Arc<EchoApi> {
            Arc::new(EchoApi {
                calls: AtomicUsize::new(0),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl VideoApi for ScriptedApi {
        async fn list_videos(&self, _ids: &[String]) -> Result<Vec<VideoItem>, VideoApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(vec![]))
        }
    }

    struct EchoApi {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl VideoApi for EchoApi {
        async fn list_videos(&self, ids: &[String]) -> Result<Vec<VideoItem>, VideoApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ids.iter().map(|id| item(id)).collect())
        }
    }

    fn item(id: &str) -> VideoItem {
        VideoItem {
            id: id.to_string(),
            snippet: Some(Snippet {
                title: format!("video {}", id),
                channel_id: "UC123".to_string(),
                channel_title: "Channel".to_string(),
                published_at: "2026-01-15T10:00:00Z".to_string(),
                description: "a longer description about rust programming".to_string(),
                category_id: "28".to_string(),
                thumbnails: None,
            }),
            content_details: Some(ContentDetails {
                duration: Some("PT1H2M10S".to_string()),
            }),
            statistics: Some(Statistics {
                view_count: Some("12345".to_string()),
                like_count: Some("678".to_string()),
            }),
        }
    }

    fn test_config() -> YouTubeConfig {
        YouTubeConfig {
            batch_size: 50,
            requests_per_second: 1000,
            quota_units_per_day: 10_000,
            api_key_env_var: "YOUTUBE_API_KEY".to_string(),
            retry_base_ms: 1,
            quota_retry_delay_secs: 3600,
        }
    }

    fn client(api: Arc<dyn VideoApi>, kv: Arc<MemoryKv>, config: YouTubeConfig) -> YouTubeClient {
        let breaker = CircuitBreaker::new(
            kv.clone(),
            API_NAME,
            3,
            Duration::from_millis(60_000),
        );
        YouTubeClient::new(api, kv, breaker, config)
    }

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("video{:05}", i)).collect()
    }

    #[tokio::test]
    async fn test_cache_hit_makes_zero_upstream_calls() {
        let kv = Arc::new(MemoryKv::new());
        let api = ScriptedApi::new(vec![]);
        let c = client(api.clone(), kv.clone(), test_config());

        let meta = parse_item(item("dQw4w9WgXcQ"), Utc::now()).unwrap();
        kv.put(
            &keys::video_metadata("dQw4w9WgXcQ"),
            serde_json::to_string(&meta).unwrap(),
            Some(METADATA_TTL),
        );

        let result = c.get_metadata(&["dQw4w9WgXcQ".to_string()]).await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(api.call_count(), 0);
    }

    #[tokio::test]
    async fn test_misses_are_batched_at_fifty() {
        let kv = Arc::new(MemoryKv::new());
        let api = ScriptedApi::echoing();
        let c = client(api.clone(), kv, test_config());

        let result = c.get_metadata(&ids(120)).await.unwrap();
        assert_eq!(result.len(), 120);
        assert_eq!(api.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_write_through_caches_fetched_items() {
        let kv = Arc::new(MemoryKv::new());
        let api = ScriptedApi::echoing();
        let c = client(api.clone(), kv.clone(), test_config());

        c.get_metadata(&ids(3)).await.unwrap();
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);
        assert!(kv.get(&keys::video_metadata("video00000")).is_some());

        // Second resolve is fully served from cache.
        c.get_metadata(&ids(3)).await.unwrap();
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_duplicate_ids_collapse() {
        let kv = Arc::new(MemoryKv::new());
        let api = ScriptedApi::echoing();
        let c = client(api.clone(), kv, test_config());

        let twice = vec!["dQw4w9WgXcQ".to_string(), "dQw4w9WgXcQ".to_string()];
        let result = c.get_metadata(&twice).await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_failure_retried_then_succeeds() {
        let kv = Arc::new(MemoryKv::new());
        let api = ScriptedApi::new(vec![
            Err(VideoApiError::Transient("503".to_string())),
            Ok(vec![item("dQw4w9WgXcQ")]),
        ]);
        let c = client(api.clone(), kv, test_config());

        let result = c.get_metadata(&["dQw4w9WgXcQ".to_string()]).await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(api.call_count(), 2);
    }

    #[tokio::test]
    async fn test_retries_exhausted_surface_transient() {
        let kv = Arc::new(MemoryKv::new());
        let api = ScriptedApi::new(vec![
            Err(VideoApiError::Transient("503".to_string())),
            Err(VideoApiError::Transient("503".to_string())),
            Err(VideoApiError::Transient("503".to_string())),
        ]);
        let c = client(api.clone(), kv, test_config());

        let err = c
            .get_metadata(&["dQw4w9WgXcQ".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, EnrichError::TransientUpstream(_)));
        assert_eq!(api.call_count(), 3);
    }

    #[tokio::test]
    async fn test_breaker_opens_after_consecutive_failed_batches() {
        let kv = Arc::new(MemoryKv::new());
        let failures = |n: usize| -> Vec<Result<Vec<VideoItem>, VideoApiError>> {
            (0..n)
                .map(|_| Err(VideoApiError::Transient("503".to_string())))
                .collect()
        };
        let api = ScriptedApi::new(failures(9));
        let c = client(api.clone(), kv, test_config());
        let target = ["dQw4w9WgXcQ".to_string()];

        for _ in 0..3 {
            let err = c.get_metadata(&target).await.unwrap_err();
            assert!(matches!(err, EnrichError::TransientUpstream(_)));
        }
        // Three failed batches tripped the breaker; next call fails fast.
        let err = c.get_metadata(&target).await.unwrap_err();
        assert!(matches!(err, EnrichError::CircuitOpen));
        assert_eq!(api.call_count(), 9);
    }

    #[tokio::test]
    async fn test_rate_limited_does_not_trip_breaker() {
        let kv = Arc::new(MemoryKv::new());
        let responses = (0..9)
            .map(|_| {
                Err(VideoApiError::RateLimited {
                    retry_after_secs: Some(0),
                })
            })
            .collect();
        let api = ScriptedApi::new(responses);
        let c = client(api.clone(), kv, test_config());
        let target = ["dQw4w9WgXcQ".to_string()];

        for _ in 0..3 {
            let err = c.get_metadata(&target).await.unwrap_err();
            assert!(matches!(err, EnrichError::TransientUpstream(_)));
        }
        // Still admitted: 429s never count as breaker failures.
        let result = c.get_metadata(&target).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_quota_budget_enforced_locally() {
        let kv = Arc::new(MemoryKv::new());
        let api = ScriptedApi::echoing();
        let mut config = test_config();
        config.quota_units_per_day = 1;
        let c = client(api.clone(), kv, config);

        c.get_metadata(&["dQw4w9WgXcQ".to_string()]).await.unwrap();
        let err = c
            .get_metadata(&["abcdefghijk".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, EnrichError::QuotaExceeded));
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_upstream_quota_verdict_surfaces() {
        let kv = Arc::new(MemoryKv::new());
        let api = ScriptedApi::new(vec![Err(VideoApiError::QuotaExceeded)]);
        let c = client(api.clone(), kv, test_config());

        let err = c
            .get_metadata(&["dQw4w9WgXcQ".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, EnrichError::QuotaExceeded));
        assert_eq!(api.call_count(), 1);
    }

    #[test]
    fn test_parse_item_full() {
        let meta = parse_item(item("dQw4w9WgXcQ"), Utc::now()).unwrap();
        assert_eq!(meta.video_id, "dQw4w9WgXcQ");
        assert_eq!(meta.duration_seconds, 3730);
        assert_eq!(meta.view_count, 12345);
        assert_eq!(meta.like_count, 678);
        assert!(meta.description_keywords.contains(&"rust".to_string()));
    }

    #[test]
    fn test_parse_item_without_snippet_is_dropped() {
        let bare = VideoItem {
            id: "x".to_string(),
            ..Default::default()
        };
        assert!(parse_item(bare, Utc::now()).is_none());
    }

    #[test]
    fn test_parse_item_defaults_missing_parts() {
        let mut sparse = item("dQw4w9WgXcQ");
        sparse.content_details = None;
        sparse.statistics = None;
        let meta = parse_item(sparse, Utc::now()).unwrap();
        assert_eq!(meta.duration_seconds, 0);
        assert_eq!(meta.view_count, 0);
    }

    #[test]
    fn test_seconds_until_utc_midnight() {
        use chrono::TimeZone;
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 23, 59, 0).unwrap();
        assert_eq!(seconds_until_utc_midnight(now), 60);
        let start_of_day = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        assert_eq!(seconds_until_utc_midnight(start_of_day), 86_400);
    }
}

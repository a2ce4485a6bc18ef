//! Video metadata enrichment: types, the upstream client, and its
//! protective machinery (cache, rate limit, retry, circuit breaker).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod breaker;
pub mod client;
pub mod duration;

pub use breaker::{BreakerState, CircuitBreaker};
pub use client::{
    ContentDetails, HttpVideoApi, Snippet, Statistics, Thumbnail, Thumbnails, VideoApi,
    VideoApiError, VideoItem, YouTubeClient,
};
pub use duration::parse_period_seconds;

/// Number of description tokens retained as keywords.
const MAX_DESCRIPTION_KEYWORDS: usize = 20;
/// Tokens this short carry no signal.
const MIN_KEYWORD_LEN: usize = 4;

#[derive(Error, Debug)]
pub enum EnrichError {
    #[error("Circuit breaker is open")]
    CircuitOpen,

    #[error("Daily quota exhausted")]
    QuotaExceeded,

    #[error("Transient upstream failure: {0}")]
    TransientUpstream(String),
}

/// Authoritative metadata for one video, shared across users.
/// Serialized to the cache as JSON with `publishedAt` as an ISO string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoMetadata {
    pub video_id: String,
    pub title: String,
    pub channel_id: String,
    pub channel_title: String,
    pub published_at: DateTime<Utc>,
    pub duration_seconds: u64,
    pub category: String,
    pub description_keywords: Vec<String>,
    pub thumbnail_url: String,
    pub view_count: u64,
    pub like_count: u64,
    pub fetched_at: DateTime<Utc>,
}

/// First 20 whitespace tokens of length > 3.
pub fn description_keywords(description: &str) -> Vec<String> {
    description
        .split_whitespace()
        .filter(|token| token.len() >= MIN_KEYWORD_LEN)
        .take(MAX_DESCRIPTION_KEYWORDS)
        .map(str::to_string)
        .collect()
}

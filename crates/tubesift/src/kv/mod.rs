//! Shared ephemeral key-value store.
//!
//! Three structures live here and nowhere else: the metadata cache, the
//! rate-limit counters, and the circuit-breaker state. They must be shared
//! across enrichment workers (worker memory is not enough to protect a
//! global quota), so everything goes through the [`KvStore`] trait behind an
//! `Arc`. The relational store stays authoritative; losing this store is a
//! latency hit, not a correctness loss.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// TTL for cached video metadata (7 days).
pub const METADATA_TTL: Duration = Duration::from_secs(604_800);

pub trait KvStore: Send + Sync {
    /// Returns the value unless absent or expired.
    fn get(&self, key: &str) -> Option<String>;

    /// Stores a value, with an optional expiry.
    fn put(&self, key: &str, value: String, ttl: Option<Duration>);

    /// Increments a windowed counter, creating it with `window` TTL on first
    /// touch, and returns the post-increment count. The window is anchored
    /// to the first increment, which is what a fixed-window rate limiter
    /// needs.
    fn incr(&self, key: &str, window: Duration) -> i64;

    fn delete(&self, key: &str);
}

/// Key layout shared by all components.
pub mod keys {
    pub fn video_metadata(video_id: &str) -> String {
        format!("video:metadata:{}", video_id)
    }

    pub fn rate_limit(api: &str, scope: &str) -> String {
        format!("rate_limit:{}:{}", api, scope)
    }

    pub fn circuit_breaker(api: &str, field: &str) -> String {
        format!("circuit_breaker:{}:{}", api, field)
    }
}

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

/// Process-local [`KvStore`]. A deployment that scales the workers across
/// processes swaps this for a networked store behind the same trait.
#[derive(Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryKv {
    fn get(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                None
            }
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }

    fn put(&self, key: &str, value: String, ttl: Option<Duration>) {
        let entry = Entry {
            value,
            expires_at: ttl.map(|d| Instant::now() + d),
        };
        self.entries.lock().unwrap().insert(key.to_string(), entry);
    }

    fn incr(&self, key: &str, window: Duration) -> i64 {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();
        let current = match entries.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                entry.value.parse::<i64>().unwrap_or(0)
            }
            _ => 0,
        };
        let next = current + 1;
        if current == 0 {
            entries.insert(
                key.to_string(),
                Entry {
                    value: next.to_string(),
                    expires_at: Some(now + window),
                },
            );
        } else if let Some(entry) = entries.get_mut(key) {
            // Keep the original window anchor.
            entry.value = next.to_string();
        }
        next
    }

    fn delete(&self, key: &str) {
        self.entries.lock().unwrap().remove(key);
    }
}

//! Circuit breaker over the shared key-value store.
//!
//! State lives in the KV store rather than a client field so that every
//! enrichment worker in the process (or fleet, with a networked store) sees
//! the same breaker. Time is passed in explicitly; nothing here sleeps.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::kv::{keys, KvStore};

use super::EnrichError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "closed" => Some(BreakerState::Closed),
            "open" => Some(BreakerState::Open),
            "half_open" => Some(BreakerState::HalfOpen),
            _ => None,
        }
    }
}

pub struct CircuitBreaker {
    kv: Arc<dyn KvStore>,
    api: String,
    failure_threshold: u32,
    reset_timeout: Duration,
}

impl CircuitBreaker {
    pub fn new(
        kv: Arc<dyn KvStore>,
        api: &str,
        failure_threshold: u32,
        reset_timeout: Duration,
    ) -> Self {
        Self {
            kv,
            api: api.to_string(),
            failure_threshold,
            reset_timeout,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.kv
            .get(&keys::circuit_breaker(&self.api, "state"))
            .as_deref()
            .and_then(BreakerState::parse)
            .unwrap_or(BreakerState::Closed)
    }

    fn failures(&self) -> u32 {
        self.kv
            .get(&keys::circuit_breaker(&self.api, "failures"))
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    fn last_failure(&self) -> Option<DateTime<Utc>> {
        self.kv
            .get(&keys::circuit_breaker(&self.api, "last_failure"))
            .and_then(|v| v.parse::<i64>().ok())
            .and_then(|ms| chrono::TimeZone::timestamp_millis_opt(&Utc, ms).single())
    }

    fn set_state(&self, state: BreakerState) {
        self.kv.put(
            &keys::circuit_breaker(&self.api, "state"),
            state.as_str().to_string(),
            None,
        );
    }

    /// Admission check. While open and within the reset window this fails
    /// fast; once the window has elapsed the breaker moves to half-open and
    /// the caller proceeds as the probe.
    pub fn check(&self, now: DateTime<Utc>) -> Result<(), EnrichError> {
        match self.state() {
            BreakerState::Closed | BreakerState::HalfOpen => Ok(()),
            BreakerState::Open => {
                let elapsed = self
                    .last_failure()
                    .map(|at| now.signed_duration_since(at))
                    .unwrap_or_else(chrono::Duration::zero);
                if elapsed >= chrono::Duration::from_std(self.reset_timeout).unwrap() {
                    info!(api = %self.api, "breaker half-open, admitting probe");
                    self.set_state(BreakerState::HalfOpen);
                    Ok(())
                } else {
                    Err(EnrichError::CircuitOpen)
                }
            }
        }
    }

    pub fn record_success(&self) {
        if self.state() != BreakerState::Closed {
            info!(api = %self.api, "breaker closed");
        }
        self.set_state(BreakerState::Closed);
        self.kv.put(
            &keys::circuit_breaker(&self.api, "failures"),
            "0".to_string(),
            None,
        );
    }

    pub fn record_failure(&self, now: DateTime<Utc>) {
        let state = self.state();
        let failures = self.failures() + 1;
        self.kv.put(
            &keys::circuit_breaker(&self.api, "failures"),
            failures.to_string(),
            None,
        );
        self.kv.put(
            &keys::circuit_breaker(&self.api, "last_failure"),
            now.timestamp_millis().to_string(),
            None,
        );

        // A half-open probe failing reopens immediately; otherwise open on
        // hitting the consecutive-failure threshold.
        if state == BreakerState::HalfOpen || failures >= self.failure_threshold {
            warn!(api = %self.api, failures, "breaker opened");
            self.set_state(BreakerState::Open);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(
            Arc::new(MemoryKv::new()),
            "youtube",
            3,
            Duration::from_millis(60_000),
        )
    }

    #[test]
    fn test_starts_closed() {
        let b = breaker();
        assert_eq!(b.state(), BreakerState::Closed);
        assert!(b.check(Utc::now()).is_ok());
    }

    #[test]
    fn test_opens_after_threshold_failures() {
        let b = breaker();
        let now = Utc::now();

        b.record_failure(now);
        b.record_failure(now);
        assert_eq!(b.state(), BreakerState::Closed);
        assert!(b.check(now).is_ok());

        b.record_failure(now);
        assert_eq!(b.state(), BreakerState::Open);
        assert!(matches!(b.check(now), Err(EnrichError::CircuitOpen)));
    }

    #[test]
    fn test_success_resets_failure_count() {
        let b = breaker();
        let now = Utc::now();

        b.record_failure(now);
        b.record_failure(now);
        b.record_success();
        b.record_failure(now);
        b.record_failure(now);
        // Two failures after the reset: still closed.
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[test]
    fn test_half_open_probe_after_reset_timeout() {
        let b = breaker();
        let now = Utc::now();
        for _ in 0..3 {
            b.record_failure(now);
        }
        assert!(matches!(b.check(now), Err(EnrichError::CircuitOpen)));

        // Just before the window: still failing fast.
        let almost = now + chrono::Duration::milliseconds(59_999);
        assert!(matches!(b.check(almost), Err(EnrichError::CircuitOpen)));

        // Window elapsed: one probe admitted, state is half-open.
        let elapsed = now + chrono::Duration::milliseconds(60_000);
        assert!(b.check(elapsed).is_ok());
        assert_eq!(b.state(), BreakerState::HalfOpen);
    }

    #[test]
    fn test_probe_success_closes() {
        let b = breaker();
        let now = Utc::now();
        for _ in 0..3 {
            b.record_failure(now);
        }
        let elapsed = now + chrono::Duration::milliseconds(60_000);
        b.check(elapsed).unwrap();
        b.record_success();
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[test]
    fn test_probe_failure_reopens_and_resets_timer() {
        let b = breaker();
        let now = Utc::now();
        for _ in 0..3 {
            b.record_failure(now);
        }
        let elapsed = now + chrono::Duration::milliseconds(60_000);
        b.check(elapsed).unwrap();
        b.record_failure(elapsed);
        assert_eq!(b.state(), BreakerState::Open);

        // Timer restarted from the probe failure.
        let shortly_after = elapsed + chrono::Duration::milliseconds(1000);
        assert!(matches!(b.check(shortly_after), Err(EnrichError::CircuitOpen)));
        let after_full_window = elapsed + chrono::Duration::milliseconds(60_000);
        assert!(b.check(after_full_window).is_ok());
    }
}

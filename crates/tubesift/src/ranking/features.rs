//! The five feature scores. Pure given their inputs — the only I/O a
//! caller performs on behalf of this module is the point read of
//! SenderStats.

use chrono::{DateTime, Utc};

use crate::db::sender_repo::SenderStatsRow;

const SENDER_LOG_CEILING: f64 = 1001.0;
const SENDER_RECENCY_HALF_LIFE_DAYS: f64 = 30.0;
const CONTACTS_BOOST: f64 = 1.5;
const UNKNOWN_SENDER_SCORE: f64 = 0.1;
const THREAD_SATURATION_REPLIES: f64 = 3.0;
const NOISE_SATURATION_COUNT: f64 = 100.0;
const SECONDS_PER_DAY: f64 = 86_400.0;

/// Everything the extractor needs for one link.
#[derive(Debug, Clone)]
pub struct RankingContext<'a> {
    pub sender_stats: Option<&'a SenderStatsRow>,
    pub thread_reply_count: i64,
    pub received_at: DateTime<Utc>,
    pub published_at: DateTime<Utc>,
    pub title: &'a str,
    pub description: Option<&'a str>,
    pub learning_goals: &'a [String],
    /// Reference time for sender recency; the ranking pass timestamp.
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector {
    pub sender: f64,
    pub thread: f64,
    pub freshness: f64,
    pub topic: f64,
    pub noise_penalty: f64,
}

pub fn extract_features(ctx: &RankingContext<'_>, freshness_half_life_days: f64) -> FeatureVector {
    FeatureVector {
        sender: sender_score(ctx.sender_stats, ctx.now),
        thread: thread_score(ctx.thread_reply_count),
        freshness: freshness_score(ctx.received_at, ctx.published_at, freshness_half_life_days),
        topic: topic_match_score(ctx.title, ctx.description, ctx.learning_goals),
        noise_penalty: noise_penalty(ctx.sender_stats),
    }
}

/// `min(1, normLog · recency · contactsBoost)` for known senders, where
/// `normLog = log(count+1)/log(1001)` and `recency = exp(-days/30)`.
fn sender_score(stats: Option<&SenderStatsRow>, now: DateTime<Utc>) -> f64 {
    let Some(stats) = stats else {
        return UNKNOWN_SENDER_SCORE;
    };
    let count = stats.email_count.max(0) as f64;
    let norm_log = ((count + 1.0).ln() / SENDER_LOG_CEILING.ln()).min(1.0);
    let days_since_last = days_between(stats.last_email_at, now).max(0.0);
    let recency = (-days_since_last / SENDER_RECENCY_HALF_LIFE_DAYS).exp();
    let boost = if stats.in_contacts { CONTACTS_BOOST } else { 1.0 };
    (norm_log * recency * boost).min(1.0)
}

fn thread_score(reply_count: i64) -> f64 {
    (reply_count.max(0) as f64 / THREAD_SATURATION_REPLIES).min(1.0)
}

/// `exp(-days_since_publish / H)`, where days-since-publish is measured
/// from publication to email receipt.
fn freshness_score(
    received_at: DateTime<Utc>,
    published_at: DateTime<Utc>,
    half_life_days: f64,
) -> f64 {
    let days = days_between(published_at, received_at).max(0.0);
    (-days / half_life_days).exp()
}

/// Fraction of learning goals appearing in the lowercased title+description.
/// No goals configured → neutral 0.5.
fn topic_match_score(title: &str, description: Option<&str>, goals: &[String]) -> f64 {
    if goals.is_empty() {
        return 0.5;
    }
    let haystack = format!("{} {}", title, description.unwrap_or("")).to_lowercase();
    let matched = goals
        .iter()
        .filter(|goal| !goal.is_empty() && haystack.contains(&goal.to_lowercase()))
        .count();
    matched as f64 / goals.len() as f64
}

/// `1 − min(count/100, 0.5)`: high-volume senders are probably newsletters.
/// Higher is better.
fn noise_penalty(stats: Option<&SenderStatsRow>) -> f64 {
    let Some(stats) = stats else {
        return 1.0;
    };
    1.0 - (stats.email_count.max(0) as f64 / NOISE_SATURATION_COUNT).min(0.5)
}

fn days_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    later.signed_duration_since(earlier).num_seconds() as f64 / SECONDS_PER_DAY
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn stats(email_count: i64, days_ago: i64, in_contacts: bool, now: DateTime<Utc>) -> SenderStatsRow {
        SenderStatsRow {
            user_id: "u1".to_string(),
            sender_address: "alice@example.com".to_string(),
            email_count,
            last_email_at: now - chrono::Duration::days(days_ago),
            in_contacts,
            updated_at: now,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap()
    }

    // ── SenderScore ──

    #[test]
    fn test_unknown_sender_scores_low() {
        assert_eq!(sender_score(None, now()), 0.1);
    }

    #[test]
    fn test_sender_score_formula() {
        let now = now();
        let s = stats(9, 0, false, now);
        let expected = (10.0_f64.ln() / 1001.0_f64.ln()).min(1.0);
        assert!((sender_score(Some(&s), now) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_sender_recency_decays() {
        let now = now();
        let fresh = stats(50, 0, false, now);
        let stale = stats(50, 60, false, now);
        assert!(sender_score(Some(&fresh), now) > sender_score(Some(&stale), now));
    }

    #[test]
    fn test_contacts_boost() {
        let now = now();
        let plain = stats(50, 5, false, now);
        let contact = stats(50, 5, true, now);
        let ratio = sender_score(Some(&contact), now) / sender_score(Some(&plain), now);
        assert!((ratio - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_sender_score_clips_at_one() {
        let now = now();
        let heavy = stats(100_000, 0, true, now);
        assert_eq!(sender_score(Some(&heavy), now), 1.0);
    }

    // ── ThreadScore ──

    #[test]
    fn test_thread_score_saturates_at_three() {
        assert_eq!(thread_score(0), 0.0);
        assert!((thread_score(1) - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(thread_score(3), 1.0);
        assert_eq!(thread_score(10), 1.0);
        assert_eq!(thread_score(-1), 0.0);
    }

    // ── FreshnessScore ──

    #[test]
    fn test_freshness_decays_with_half_life() {
        let published = now();
        let same_day = freshness_score(published, published, 30.0);
        assert!((same_day - 1.0).abs() < 1e-9);

        let received = published + chrono::Duration::days(30);
        let after_half_life = freshness_score(received, published, 30.0);
        assert!((after_half_life - (-1.0_f64).exp()).abs() < 1e-9);
    }

    #[test]
    fn test_freshness_future_publish_clamps() {
        // Published "after" receipt (clock skew upstream): treated as fresh.
        let received = now();
        let published = received + chrono::Duration::days(2);
        assert_eq!(freshness_score(received, published, 30.0), 1.0);
    }

    // ── TopicMatchScore ──

    #[test]
    fn test_topic_no_goals_is_neutral() {
        assert_eq!(topic_match_score("any title", None, &[]), 0.5);
    }

    #[test]
    fn test_topic_fraction_of_goals_matched() {
        let goals = vec!["rust".to_string(), "haskell".to_string()];
        let score = topic_match_score("Advanced Rust Tricks", None, &goals);
        assert!((score - 0.5).abs() < 1e-9);

        let score = topic_match_score(
            "Advanced Rust Tricks",
            Some("also some haskell content"),
            &goals,
        );
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_topic_match_is_case_insensitive() {
        let goals = vec!["RuSt".to_string()];
        assert_eq!(topic_match_score("learning rust today", None, &goals), 1.0);
    }

    // ── NoisePenalty ──

    #[test]
    fn test_noise_penalty_bounds() {
        assert_eq!(noise_penalty(None), 1.0);
        let now = now();
        assert!((noise_penalty(Some(&stats(10, 0, false, now))) - 0.9).abs() < 1e-9);
        assert_eq!(noise_penalty(Some(&stats(50, 0, false, now))), 0.5);
        // saturates: never below 0.5
        assert_eq!(noise_penalty(Some(&stats(500, 0, false, now))), 0.5);
    }

    // ── Boundedness property ──

    #[test]
    fn test_all_features_bounded_in_unit_interval() {
        let now = now();
        let goal_sets: Vec<Vec<String>> = vec![
            vec![],
            vec!["rust".to_string()],
            vec!["rust".to_string(), "go".to_string(), "zig".to_string()],
        ];
        // Sweep a grid of extremes.
        for count in [0i64, 1, 50, 1000, 1_000_000] {
            for days_ago in [0i64, 1, 30, 365, 10_000] {
                for in_contacts in [false, true] {
                    for replies in [0i64, 1, 3, 50] {
                        for goals in &goal_sets {
                            let s = stats(count, days_ago, in_contacts, now);
                            let ctx = RankingContext {
                                sender_stats: Some(&s),
                                thread_reply_count: replies,
                                received_at: now,
                                published_at: now - chrono::Duration::days(days_ago),
                                title: "Rust and other topics",
                                description: Some("description text"),
                                learning_goals: goals,
                                now,
                            };
                            let fv = extract_features(&ctx, 30.0);
                            for (name, value) in [
                                ("sender", fv.sender),
                                ("thread", fv.thread),
                                ("freshness", fv.freshness),
                                ("topic", fv.topic),
                                ("noise_penalty", fv.noise_penalty),
                            ] {
                                assert!(
                                    (0.0..=1.0).contains(&value),
                                    "{} out of bounds: {}",
                                    name,
                                    value
                                );
                            }
                        }
                    }
                }
            }
        }
    }
}

//! Weighted linear ranker: score, classify, explain, tag.

use crate::config::RankingConfig;

use super::features::{extract_features, FeatureVector, RankingContext};
use super::Classification;

/// Curated domain vocabulary for topic tags. Title tokens longer than three
/// chars that appear here become tags, capped at five.
const TOPIC_VOCABULARY: &[&str] = &[
    "rust", "python", "typescript", "javascript", "golang", "database", "databases", "systems",
    "kubernetes", "docker", "linux", "security", "compiler", "compilers", "async", "network",
    "networking", "cloud", "devops", "react", "frontend", "backend", "testing", "performance",
    "design", "architecture", "machine", "learning", "data", "engineering", "algorithms",
    "interview", "programming", "tutorial", "webdev", "career", "distributed", "concurrency",
];

const MAX_TOPIC_TAGS: usize = 5;

#[derive(Debug, Clone)]
pub struct RankOutcome {
    pub features: FeatureVector,
    pub final_score: f64,
    pub classification: Classification,
    pub explanation: String,
    pub topic_tags: Vec<String>,
}

pub struct Ranker {
    config: RankingConfig,
}

impl Ranker {
    pub fn new(config: RankingConfig) -> Self {
        Self { config }
    }

    pub fn rank(&self, ctx: &RankingContext<'_>) -> RankOutcome {
        let features = extract_features(ctx, self.config.freshness_half_life_days);
        let final_score = self.score(&features);
        let classification = self.classify(final_score);
        RankOutcome {
            explanation: explain(&features, classification, final_score),
            topic_tags: topic_tags(ctx.title),
            features,
            final_score,
            classification,
        }
    }

    /// Weighted linear combination, clamped to [0, 1].
    pub fn score(&self, fv: &FeatureVector) -> f64 {
        let w = &self.config.feature_weights;
        let score = w.sender * fv.sender
            + w.thread * fv.thread
            + w.freshness * fv.freshness
            + w.topic * fv.topic
            + w.noise_penalty * fv.noise_penalty;
        score.clamp(0.0, 1.0)
    }

    pub fn classify(&self, score: f64) -> Classification {
        if score >= self.config.watch_now_threshold {
            Classification::WatchNow
        } else if score >= self.config.save_threshold {
            Classification::Save
        } else {
            Classification::Skip
        }
    }
}

/// Human-readable reasons in a fixed order, so the same feature vector
/// always explains itself the same way.
fn explain(fv: &FeatureVector, classification: Classification, score: f64) -> String {
    let mut reasons = Vec::new();
    if fv.sender > 0.7 {
        reasons.push("from an important sender");
    }
    if fv.thread > 0.5 {
        reasons.push("part of an active thread");
    }
    if fv.freshness > 0.7 {
        reasons.push("recently published");
    }
    if fv.topic > 0.5 {
        reasons.push("matches your learning goals");
    }
    if fv.noise_penalty < 0.7 {
        reasons.push("from a frequent sender");
    }

    if reasons.is_empty() {
        format!("{} (score {:.2})", classification.as_str(), score)
    } else {
        reasons.join(", ")
    }
}

fn topic_tags(title: &str) -> Vec<String> {
    let mut tags = Vec::new();
    for token in title.split_whitespace() {
        let cleaned: String = token
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        if cleaned.len() > 3
            && TOPIC_VOCABULARY.contains(&cleaned.as_str())
            && !tags.contains(&cleaned)
        {
            tags.push(cleaned);
            if tags.len() == MAX_TOPIC_TAGS {
                break;
            }
        }
    }
    tags
}

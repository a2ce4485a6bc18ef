//! Deterministic scoring and classification of extracted links.

use serde::{Deserialize, Serialize};

pub mod features;
pub mod ranker;

pub use features::{extract_features, FeatureVector, RankingContext};
pub use ranker::{RankOutcome, Ranker};

/// Ordered from most to least favorable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    WatchNow,
    Save,
    Skip,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::WatchNow => "watch_now",
            Classification::Save => "save",
            Classification::Skip => "skip",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "watch_now" => Some(Classification::WatchNow),
            "save" => Some(Classification::Save),
            "skip" => Some(Classification::Skip),
            _ => None,
        }
    }
}

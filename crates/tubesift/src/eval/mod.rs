//! Offline evaluation harness: replays stored rankings against stored
//! feedback. Every metric is a deterministic function of persisted rows —
//! re-running on the same snapshot yields identical numbers.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, NaiveDate, Utc};
use tracing::debug;

use crate::db::{feedback_repo, link_repo, ranking_repo, Database, DatabaseError};

const STABILITY_TOP_K: usize = 20;

#[derive(Debug, Clone)]
pub struct EvalParams {
    pub user_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub ks: Vec<usize>,
}

impl EvalParams {
    pub fn new(user_id: impl Into<String>, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            start,
            end,
            ks: vec![5, 10, 20],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvalReport {
    pub precision_at_k: BTreeMap<usize, f64>,
    pub coverage: f64,
    pub novelty: f64,
    pub stability: f64,
    pub ranking_count: usize,
    pub relevant_count: usize,
}

pub fn evaluate(db: &Database, params: &EvalParams) -> Result<EvalReport, DatabaseError> {
    let (rankings, relevant, extracted, channels) = db.with_conn(|conn| {
        let rankings =
            ranking_repo::list_in_range(conn, &params.user_id, params.start, params.end)?;
        let relevant = feedback_repo::relevant_link_ids_in_range(
            conn,
            &params.user_id,
            params.start,
            params.end,
        )?;
        let extracted =
            link_repo::count_extracted_in_range(conn, &params.user_id, params.start, params.end)?;
        let channels = ranking_repo::list_channel_ids_in_range(
            conn,
            &params.user_id,
            params.start,
            params.end,
        )?;
        Ok((rankings, relevant, extracted, channels))
    })?;

    debug!(
        rankings = rankings.len(),
        relevant = relevant.len(),
        extracted,
        "evaluation inputs loaded"
    );

    let mut precision_at_k = BTreeMap::new();
    for &k in &params.ks {
        precision_at_k.insert(k, precision(&rankings, &relevant, k));
    }

    Ok(EvalReport {
        precision_at_k,
        coverage: coverage(&rankings, extracted),
        novelty: novelty(&channels),
        stability: stability(&rankings),
        ranking_count: rankings.len(),
        relevant_count: relevant.len(),
    })
}

/// Fraction of the top-k rankings (already ordered by score desc, recency
/// desc) flagged relevant, over min(k, |rankings|).
fn precision(
    rankings: &[ranking_repo::RankingRow],
    relevant: &HashSet<String>,
    k: usize,
) -> f64 {
    let denominator = k.min(rankings.len());
    if denominator == 0 {
        return 0.0;
    }
    let hits = rankings
        .iter()
        .take(k)
        .filter(|r| relevant.contains(&r.link_id))
        .count();
    hits as f64 / denominator as f64
}

/// Distinct ranked links over links extracted in the range.
fn coverage(rankings: &[ranking_repo::RankingRow], extracted: i64) -> f64 {
    if extracted <= 0 {
        return 0.0;
    }
    let distinct: HashSet<&str> = rankings.iter().map(|r| r.link_id.as_str()).collect();
    distinct.len() as f64 / extracted as f64
}

/// Distinct channels over ranking count. Unenriched rankings contribute to
/// the denominator only.
fn novelty(channels: &[Option<String>]) -> f64 {
    if channels.is_empty() {
        return 0.0;
    }
    let distinct: HashSet<&str> = channels
        .iter()
        .filter_map(|c| c.as_deref())
        .collect();
    distinct.len() as f64 / channels.len() as f64
}

/// Mean Jaccard similarity of top-20 link sets between adjacent calendar
/// days. Fewer than two days of data is perfectly stable by definition.
fn stability(rankings: &[ranking_repo::RankingRow]) -> f64 {
    let mut by_day: HashMap<NaiveDate, Vec<&ranking_repo::RankingRow>> = HashMap::new();
    for ranking in rankings {
        by_day
            .entry(ranking.ranked_at.date_naive())
            .or_default()
            .push(ranking);
    }
    if by_day.len() < 2 {
        return 1.0;
    }

    let mut days: Vec<NaiveDate> = by_day.keys().copied().collect();
    days.sort();

    let top_set = |day: &NaiveDate| -> HashSet<&str> {
        let mut rows = by_day[day].clone();
        rows.sort_by(|a, b| {
            b.final_score
                .partial_cmp(&a.final_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.ranked_at.cmp(&a.ranked_at))
        });
        rows.iter()
            .take(STABILITY_TOP_K)
            .map(|r| r.link_id.as_str())
            .collect()
    };

    let mut total = 0.0;
    let mut pairs = 0;
    for pair in days.windows(2) {
        let (s1, s2) = (top_set(&pair[0]), top_set(&pair[1]));
        let intersection = s1.intersection(&s2).count();
        let union = s1.union(&s2).count();
        total += if union == 0 {
            1.0
        } else {
            intersection as f64 / union as f64
        };
        pairs += 1;
    }
    total / pairs as f64
}

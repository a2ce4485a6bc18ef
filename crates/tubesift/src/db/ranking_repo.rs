//! Ranking rows. A link accumulates a time series of rankings; history is
//! never deleted because the evaluation harness needs it.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use crate::ranking::Classification;

use super::{parse_ts, to_ts, DatabaseError};

#[derive(Debug, Clone)]
pub struct RankingRow {
    pub id: String,
    pub user_id: String,
    pub link_id: String,
    pub ranked_at: DateTime<Utc>,
    pub sender_score: f64,
    pub thread_score: f64,
    pub freshness_score: f64,
    pub topic_score: f64,
    pub noise_penalty: f64,
    pub final_score: f64,
    pub classification: Classification,
    pub explanation: String,
    pub topic_tags: Vec<String>,
}

impl RankingRow {
    fn from_row(row: &Row<'_>) -> Result<Self, DatabaseError> {
        let ranked_at: String = row.get("ranked_at")?;
        let classification: String = row.get("classification")?;
        let topic_tags: String = row.get("topic_tags")?;
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            link_id: row.get("link_id")?,
            ranked_at: parse_ts(&ranked_at)?,
            sender_score: row.get("sender_score")?,
            thread_score: row.get("thread_score")?,
            freshness_score: row.get("freshness_score")?,
            topic_score: row.get("topic_score")?,
            noise_penalty: row.get("noise_penalty")?,
            final_score: row.get("final_score")?,
            classification: Classification::parse(&classification)
                .ok_or_else(|| DatabaseError::InvalidEnum(classification.clone()))?,
            explanation: row.get("explanation")?,
            topic_tags: serde_json::from_str(&topic_tags)?,
        })
    }
}

/// Inserts the ranking; a second pass landing on the same
/// `(user, link, ranked_at)` second updates the row in place.
pub fn upsert(conn: &Connection, ranking: &RankingRow) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO rankings (id, user_id, link_id, ranked_at, sender_score, thread_score,
         freshness_score, topic_score, noise_penalty, final_score, classification,
         explanation, topic_tags)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
         ON CONFLICT (user_id, link_id, ranked_at) DO UPDATE SET
           sender_score = excluded.sender_score,
           thread_score = excluded.thread_score,
           freshness_score = excluded.freshness_score,
           topic_score = excluded.topic_score,
           noise_penalty = excluded.noise_penalty,
           final_score = excluded.final_score,
           classification = excluded.classification,
           explanation = excluded.explanation,
           topic_tags = excluded.topic_tags",
        params![
            ranking.id,
            ranking.user_id,
            ranking.link_id,
            to_ts(ranking.ranked_at),
            ranking.sender_score,
            ranking.thread_score,
            ranking.freshness_score,
            ranking.topic_score,
            ranking.noise_penalty,
            ranking.final_score,
            ranking.classification.as_str(),
            ranking.explanation,
            serde_json::to_string(&ranking.topic_tags)?,
        ],
    )?;
    Ok(())
}

/// Rankings in `[start, end)`, ordered by final score descending, then
/// recency descending — the evaluation harness' canonical ordering.
pub fn list_in_range(
    conn: &Connection,
    user_id: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<RankingRow>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM rankings
         WHERE user_id = ?1 AND ranked_at >= ?2 AND ranked_at < ?3
         ORDER BY final_score DESC, ranked_at DESC",
    )?;
    let rows = stmt.query_map(params![user_id, to_ts(start), to_ts(end)], |row| {
        Ok(RankingRow::from_row(row))
    })?;
    let mut rankings = Vec::new();
    for row in rows {
        rankings.push(row??);
    }
    Ok(rankings)
}

/// Channel id of each ranking in range (None when the video is unenriched),
/// one entry per ranking row.
pub fn list_channel_ids_in_range(
    conn: &Connection,
    user_id: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<Option<String>>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT m.channel_id FROM rankings r
         JOIN youtube_links l ON l.id = r.link_id
         LEFT JOIN video_metadata m ON m.video_id = l.video_id
         WHERE r.user_id = ?1 AND r.ranked_at >= ?2 AND r.ranked_at < ?3",
    )?;
    let rows = stmt.query_map(params![user_id, to_ts(start), to_ts(end)], |row| {
        row.get::<_, Option<String>>(0)
    })?;
    let mut channels = Vec::new();
    for row in rows {
        channels.push(row?);
    }
    Ok(channels)
}

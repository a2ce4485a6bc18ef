//! Append-only user feedback.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};

use crate::ranking::Classification;

use super::{parse_ts, to_ts, DatabaseError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackAction {
    Watched,
    Saved,
    Skipped,
    Dismissed,
}

impl FeedbackAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackAction::Watched => "watched",
            FeedbackAction::Saved => "saved",
            FeedbackAction::Skipped => "skipped",
            FeedbackAction::Dismissed => "dismissed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "watched" => Some(FeedbackAction::Watched),
            "saved" => Some(FeedbackAction::Saved),
            "skipped" => Some(FeedbackAction::Skipped),
            "dismissed" => Some(FeedbackAction::Dismissed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FeedbackRow {
    pub id: String,
    pub user_id: String,
    pub link_id: String,
    pub ranking_id: Option<String>,
    pub action: FeedbackAction,
    pub relevance_label: Option<Classification>,
    pub provided_at: DateTime<Utc>,
}

impl FeedbackRow {
    fn from_row(row: &Row<'_>) -> Result<Self, DatabaseError> {
        let action: String = row.get("action")?;
        let label: Option<String> = row.get("relevance_label")?;
        let provided_at: String = row.get("provided_at")?;
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            link_id: row.get("link_id")?,
            ranking_id: row.get("ranking_id")?,
            action: FeedbackAction::parse(&action)
                .ok_or_else(|| DatabaseError::InvalidEnum(action.clone()))?,
            relevance_label: label.as_deref().and_then(Classification::parse),
            provided_at: parse_ts(&provided_at)?,
        })
    }
}

pub fn insert(conn: &Connection, feedback: &FeedbackRow) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO feedback (id, user_id, link_id, ranking_id, action, relevance_label,
         provided_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            feedback.id,
            feedback.user_id,
            feedback.link_id,
            feedback.ranking_id,
            feedback.action.as_str(),
            feedback.relevance_label.map(|c| c.as_str()),
            to_ts(feedback.provided_at),
        ],
    )?;
    Ok(())
}

/// Feedback for a user inside `[start, end)`, oldest first.
pub fn list_in_range(
    conn: &Connection,
    user_id: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<FeedbackRow>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM feedback
         WHERE user_id = ?1 AND provided_at >= ?2 AND provided_at < ?3
         ORDER BY provided_at",
    )?;
    let rows = stmt.query_map(params![user_id, to_ts(start), to_ts(end)], |row| {
        Ok(FeedbackRow::from_row(row))
    })?;
    let mut feedback = Vec::new();
    for row in rows {
        feedback.push(row??);
    }
    Ok(feedback)
}

/// Link ids judged relevant inside `[start, end)`: action `watched`, or a
/// provided `watch_now` label.
pub fn relevant_link_ids_in_range(
    conn: &Connection,
    user_id: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<HashSet<String>, DatabaseError> {
    Ok(list_in_range(conn, user_id, start, end)?
        .into_iter()
        .filter(|f| {
            f.action == FeedbackAction::Watched
                || f.relevance_label == Some(Classification::WatchNow)
        })
        .map(|f| f.link_id)
        .collect())
}

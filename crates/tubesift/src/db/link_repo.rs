//! Extracted YouTube link rows.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{parse_ts, to_ts, DatabaseError};

#[derive(Debug, Clone)]
pub struct LinkRow {
    pub id: String,
    pub user_id: String,
    pub email_id: String,
    pub video_id: String,
    pub playlist_id: Option<String>,
    pub canonical_url: String,
    /// True iff the same (user, video_id) pair existed before this row.
    pub is_duplicate: bool,
    pub extracted_at: DateTime<Utc>,
}

impl LinkRow {
    fn from_row(row: &Row<'_>) -> Result<Self, DatabaseError> {
        let extracted_at: String = row.get("extracted_at")?;
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            email_id: row.get("email_id")?,
            video_id: row.get("video_id")?,
            playlist_id: row.get("playlist_id")?,
            canonical_url: row.get("canonical_url")?,
            is_duplicate: row.get("is_duplicate")?,
            extracted_at: parse_ts(&extracted_at)?,
        })
    }
}

/// Inserts the row unless `(user_id, email_id, video_id)` already exists.
pub fn insert_ignore(conn: &Connection, link: &LinkRow) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "INSERT INTO youtube_links (id, user_id, email_id, video_id, playlist_id,
         canonical_url, is_duplicate, extracted_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT (user_id, email_id, video_id) DO NOTHING",
        params![
            link.id,
            link.user_id,
            link.email_id,
            link.video_id,
            link.playlist_id,
            link.canonical_url,
            link.is_duplicate,
            to_ts(link.extracted_at),
        ],
    )?;
    Ok(changed > 0)
}

pub fn find_by_id(conn: &Connection, id: &str) -> Result<Option<LinkRow>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM youtube_links WHERE id = ?1")?;
    stmt.query_row(params![id], |row| Ok(LinkRow::from_row(row)))
        .optional()?
        .transpose()
}

/// Whether this user has already seen this video in any prior email.
pub fn exists_for_user_video(
    conn: &Connection,
    user_id: &str,
    video_id: &str,
) -> Result<bool, DatabaseError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM youtube_links WHERE user_id = ?1 AND video_id = ?2",
        params![user_id, video_id],
        |r| r.get(0),
    )?;
    Ok(count > 0)
}

pub fn list_for_email(conn: &Connection, email_id: &str) -> Result<Vec<LinkRow>, DatabaseError> {
    let mut stmt =
        conn.prepare("SELECT * FROM youtube_links WHERE email_id = ?1 ORDER BY video_id")?;
    let rows = stmt.query_map(params![email_id], |row| Ok(LinkRow::from_row(row)))?;
    let mut links = Vec::new();
    for row in rows {
        links.push(row??);
    }
    Ok(links)
}

/// Links of an email whose video has no metadata row yet.
pub fn list_for_email_missing_metadata(
    conn: &Connection,
    email_id: &str,
) -> Result<Vec<LinkRow>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT l.* FROM youtube_links l
         LEFT JOIN video_metadata m ON m.video_id = l.video_id
         WHERE l.email_id = ?1 AND m.video_id IS NULL
         ORDER BY l.video_id",
    )?;
    let rows = stmt.query_map(params![email_id], |row| Ok(LinkRow::from_row(row)))?;
    let mut links = Vec::new();
    for row in rows {
        links.push(row??);
    }
    Ok(links)
}

/// Number of links extracted for a user inside `[start, end)`.
pub fn count_extracted_in_range(
    conn: &Connection,
    user_id: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<i64, DatabaseError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM youtube_links
         WHERE user_id = ?1 AND extracted_at >= ?2 AND extracted_at < ?3",
        params![user_id, to_ts(start), to_ts(end)],
        |r| r.get(0),
    )?;
    Ok(count)
}

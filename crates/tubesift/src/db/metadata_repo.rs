//! Authoritative video metadata rows. The key-value cache in front of this
//! table is a latency optimization only; this table is the source of truth.

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::youtube::VideoMetadata;

use super::{parse_ts, to_ts, DatabaseError};

fn from_row(row: &Row<'_>) -> Result<VideoMetadata, DatabaseError> {
    let published_at: String = row.get("published_at")?;
    let fetched_at: String = row.get("fetched_at")?;
    let keywords: String = row.get("description_keywords")?;
    Ok(VideoMetadata {
        video_id: row.get("video_id")?,
        title: row.get("title")?,
        channel_id: row.get("channel_id")?,
        channel_title: row.get("channel_title")?,
        published_at: parse_ts(&published_at)?,
        duration_seconds: row.get("duration_seconds")?,
        category: row.get("category")?,
        description_keywords: serde_json::from_str(&keywords)?,
        thumbnail_url: row.get("thumbnail_url")?,
        view_count: row.get("view_count")?,
        like_count: row.get("like_count")?,
        fetched_at: parse_ts(&fetched_at)?,
    })
}

/// Inserts or refreshes the row in place. Metadata is global (shared across
/// users) and never deleted here.
pub fn upsert(conn: &Connection, meta: &VideoMetadata) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO video_metadata (video_id, title, channel_id, channel_title,
         published_at, duration_seconds, category, description_keywords,
         thumbnail_url, view_count, like_count, fetched_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
         ON CONFLICT (video_id) DO UPDATE SET
           title = excluded.title,
           channel_id = excluded.channel_id,
           channel_title = excluded.channel_title,
           published_at = excluded.published_at,
           duration_seconds = excluded.duration_seconds,
           category = excluded.category,
           description_keywords = excluded.description_keywords,
           thumbnail_url = excluded.thumbnail_url,
           view_count = excluded.view_count,
           like_count = excluded.like_count,
           fetched_at = excluded.fetched_at",
        params![
            meta.video_id,
            meta.title,
            meta.channel_id,
            meta.channel_title,
            to_ts(meta.published_at),
            meta.duration_seconds,
            meta.category,
            serde_json::to_string(&meta.description_keywords)?,
            meta.thumbnail_url,
            meta.view_count,
            meta.like_count,
            to_ts(meta.fetched_at),
        ],
    )?;
    Ok(())
}

pub fn find(conn: &Connection, video_id: &str) -> Result<Option<VideoMetadata>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM video_metadata WHERE video_id = ?1")?;
    stmt.query_row(params![video_id], |row| Ok(from_row(row)))
        .optional()?
        .transpose()
}

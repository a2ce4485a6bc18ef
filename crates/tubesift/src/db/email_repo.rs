//! Email rows. Created once per (user, message) by the email processor and
//! never mutated afterwards.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{parse_ts, to_ts, DatabaseError};

#[derive(Debug, Clone)]
pub struct EmailRow {
    pub id: String,
    pub user_id: String,
    pub message_id: String,
    pub thread_id: String,
    pub sender_address: String,
    pub sender_name: Option<String>,
    pub subject: String,
    pub received_at: DateTime<Utc>,
    pub snippet: String,
    pub labels: Vec<String>,
    pub thread_reply_count: i64,
    pub created_at: DateTime<Utc>,
}

impl EmailRow {
    fn from_row(row: &Row<'_>) -> Result<Self, DatabaseError> {
        let received_at: String = row.get("received_at")?;
        let created_at: String = row.get("created_at")?;
        let labels: String = row.get("labels")?;
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            message_id: row.get("message_id")?,
            thread_id: row.get("thread_id")?,
            sender_address: row.get("sender_address")?,
            sender_name: row.get("sender_name")?,
            subject: row.get("subject")?,
            received_at: parse_ts(&received_at)?,
            snippet: row.get("snippet")?,
            labels: serde_json::from_str(&labels)?,
            thread_reply_count: row.get("thread_reply_count")?,
            created_at: parse_ts(&created_at)?,
        })
    }
}

/// Inserts the row unless `(user_id, message_id)` already exists.
/// Returns whether a row was actually written, so redelivered jobs can
/// detect the no-op path.
pub fn insert_ignore(conn: &Connection, email: &EmailRow) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "INSERT INTO emails (id, user_id, message_id, thread_id, sender_address,
         sender_name, subject, received_at, snippet, labels, thread_reply_count, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
         ON CONFLICT (user_id, message_id) DO NOTHING",
        params![
            email.id,
            email.user_id,
            email.message_id,
            email.thread_id,
            email.sender_address,
            email.sender_name,
            email.subject,
            to_ts(email.received_at),
            email.snippet,
            serde_json::to_string(&email.labels)?,
            email.thread_reply_count,
            to_ts(email.created_at),
        ],
    )?;
    Ok(changed > 0)
}

pub fn find_by_message_id(
    conn: &Connection,
    user_id: &str,
    message_id: &str,
) -> Result<Option<EmailRow>, DatabaseError> {
    let mut stmt =
        conn.prepare("SELECT * FROM emails WHERE user_id = ?1 AND message_id = ?2")?;
    stmt.query_row(params![user_id, message_id], |row| Ok(EmailRow::from_row(row)))
        .optional()?
        .transpose()
}

pub fn find_by_id(conn: &Connection, id: &str) -> Result<Option<EmailRow>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM emails WHERE id = ?1")?;
    stmt.query_row(params![id], |row| Ok(EmailRow::from_row(row)))
        .optional()?
        .transpose()
}

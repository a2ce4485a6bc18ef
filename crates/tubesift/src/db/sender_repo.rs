//! Per-(user, sender) aggregates, maintained by the email processor with
//! upsert semantics so redelivered jobs cannot double-count.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{parse_ts, to_ts, DatabaseError};

#[derive(Debug, Clone)]
pub struct SenderStatsRow {
    pub user_id: String,
    pub sender_address: String,
    pub email_count: i64,
    pub last_email_at: DateTime<Utc>,
    pub in_contacts: bool,
    pub updated_at: DateTime<Utc>,
}

impl SenderStatsRow {
    fn from_row(row: &Row<'_>) -> Result<Self, DatabaseError> {
        let last_email_at: String = row.get("last_email_at")?;
        let updated_at: String = row.get("updated_at")?;
        Ok(Self {
            user_id: row.get("user_id")?,
            sender_address: row.get("sender_address")?,
            email_count: row.get("email_count")?,
            last_email_at: parse_ts(&last_email_at)?,
            in_contacts: row.get("in_contacts")?,
            updated_at: parse_ts(&updated_at)?,
        })
    }
}

/// Records one observed email from a sender. `email_count` only ever grows;
/// `last_email_at` takes the max of the stored and observed value (RFC3339
/// strings compare chronologically).
pub fn record_email(
    conn: &Connection,
    user_id: &str,
    sender_address: &str,
    received_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO sender_stats (user_id, sender_address, email_count, last_email_at,
         in_contacts, updated_at)
         VALUES (?1, ?2, 1, ?3, 0, ?4)
         ON CONFLICT (user_id, sender_address) DO UPDATE SET
           email_count = email_count + 1,
           last_email_at = max(last_email_at, excluded.last_email_at),
           updated_at = excluded.updated_at",
        params![user_id, sender_address, to_ts(received_at), to_ts(now)],
    )?;
    Ok(())
}

pub fn set_in_contacts(
    conn: &Connection,
    user_id: &str,
    sender_address: &str,
    in_contacts: bool,
    now: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE sender_stats SET in_contacts = ?3, updated_at = ?4
         WHERE user_id = ?1 AND sender_address = ?2",
        params![user_id, sender_address, in_contacts, to_ts(now)],
    )?;
    Ok(())
}

pub fn find(
    conn: &Connection,
    user_id: &str,
    sender_address: &str,
) -> Result<Option<SenderStatsRow>, DatabaseError> {
    let mut stmt =
        conn.prepare("SELECT * FROM sender_stats WHERE user_id = ?1 AND sender_address = ?2")?;
    stmt.query_row(params![user_id, sender_address], |row| {
        Ok(SenderStatsRow::from_row(row))
    })
    .optional()?
    .transpose()
}

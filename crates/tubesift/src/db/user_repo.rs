//! User rows: account identity, encrypted credentials, inbox cursor.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::{parse_ts, to_ts, DatabaseError};

/// Per-user preferences, stored as JSON. Unknown fields survive a
/// round-trip but are ignored semantically.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserPreferences {
    #[serde(default)]
    pub learning_goals: Vec<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub email_address: String,
    pub credential_cipher: Option<Vec<u8>>,
    pub credential_nonce: Option<Vec<u8>>,
    pub history_cursor: Option<String>,
    pub preferences: UserPreferences,
    pub needs_reauth: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserRow {
    fn from_row(row: &Row<'_>) -> Result<Self, DatabaseError> {
        let preferences: String = row.get("preferences")?;
        let created_at: String = row.get("created_at")?;
        let updated_at: String = row.get("updated_at")?;
        Ok(Self {
            id: row.get("id")?,
            email_address: row.get("email_address")?,
            credential_cipher: row.get("credential_cipher")?,
            credential_nonce: row.get("credential_nonce")?,
            history_cursor: row.get("history_cursor")?,
            preferences: serde_json::from_str(&preferences)?,
            needs_reauth: row.get("needs_reauth")?,
            created_at: parse_ts(&created_at)?,
            updated_at: parse_ts(&updated_at)?,
        })
    }
}

pub fn insert(conn: &Connection, user: &UserRow) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO users (id, email_address, credential_cipher, credential_nonce,
         history_cursor, preferences, needs_reauth, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            user.id,
            user.email_address,
            user.credential_cipher,
            user.credential_nonce,
            user.history_cursor,
            serde_json::to_string(&user.preferences)?,
            user.needs_reauth,
            to_ts(user.created_at),
            to_ts(user.updated_at),
        ],
    )?;
    Ok(())
}

pub fn find_by_id(conn: &Connection, id: &str) -> Result<Option<UserRow>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM users WHERE id = ?1")?;
    stmt.query_row(params![id], |row| Ok(UserRow::from_row(row)))
        .optional()?
        .transpose()
}

pub fn list_active(conn: &Connection) -> Result<Vec<UserRow>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM users WHERE needs_reauth = 0 ORDER BY id")?;
    let rows = stmt.query_map([], |row| Ok(UserRow::from_row(row)))?;
    let mut users = Vec::new();
    for row in rows {
        users.push(row??);
    }
    Ok(users)
}

/// Persists a new change cursor. Only the inbox synchronizer calls this,
/// and only after a full listing pass.
pub fn set_cursor(
    conn: &Connection,
    user_id: &str,
    cursor: &str,
    now: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE users SET history_cursor = ?2, updated_at = ?3 WHERE id = ?1",
        params![user_id, cursor, to_ts(now)],
    )?;
    Ok(())
}

pub fn set_credentials(
    conn: &Connection,
    user_id: &str,
    cipher: &[u8],
    nonce: &[u8],
    now: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE users SET credential_cipher = ?2, credential_nonce = ?3, updated_at = ?4
         WHERE id = ?1",
        params![user_id, cipher, nonce, to_ts(now)],
    )?;
    Ok(())
}

/// Flags the user for re-authorization after an unambiguous revocation.
pub fn mark_needs_reauth(
    conn: &Connection,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE users SET needs_reauth = 1, updated_at = ?2 WHERE id = ?1",
        params![user_id, to_ts(now)],
    )?;
    Ok(())
}

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Migration {version} ('{name}') failed: {source}")]
    Migration {
        version: i64,
        name: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Failed to (de)serialize stored JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid stored timestamp '{0}'")]
    InvalidTimestamp(String),

    #[error("Invalid stored enum value '{0}'")]
    InvalidEnum(String),

    #[error("Database lock poisoned")]
    LockPoisoned,
}

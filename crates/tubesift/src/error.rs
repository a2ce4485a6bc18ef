use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TubesiftError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Queue error: {0}")]
    Queue(#[from] crate::queue::QueueError),

    #[error("Inbox error: {0}")]
    Inbox(#[from] crate::inbox::InboxError),

    #[error("Authorization error: {0}")]
    Auth(#[from] crate::inbox::AuthError),

    #[error("Enrichment error: {0}")]
    Enrich(#[from] crate::youtube::EnrichError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Required credential is missing: {0}")]
    MissingCredential(String),
}

pub type Result<T> = std::result::Result<T, TubesiftError>;

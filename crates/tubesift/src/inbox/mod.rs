//! Inbox side of the pipeline: the upstream API seam, credential handling,
//! message decoding, and the incremental synchronizer.

use thiserror::Error;

pub mod api;
pub mod auth;
pub mod decode;
pub mod http;
pub mod sync;

pub use api::{
    AccessToken, Header, HistoryPage, InboxApi, InboxProfile, Message, MessagePage, MessagePart,
    MessageRef, Thread,
};
pub use auth::{AuthError, CredentialSet, CredentialStore, TokenRefresher};
pub use http::GmailApi;
pub use sync::{InboxSynchronizer, SyncOutcome};

#[derive(Error, Debug)]
pub enum InboxError {
    #[error("Transient upstream failure: {0}")]
    Transient(String),

    #[error("Upstream rejected the access token")]
    Unauthorized,

    #[error("Upstream rate limit hit")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Change cursor expired")]
    CursorExpired,

    #[error("Upstream protocol error: {0}")]
    Protocol(String),
}

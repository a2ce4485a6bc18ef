//! The inbox API seam: the operations the pipeline needs, nothing more.
//! Production talks to Gmail over HTTP; tests script a fake.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;

use super::InboxError;

pub type AccessToken = SecretString;

#[derive(Debug, Clone)]
pub struct InboxProfile {
    pub email_address: String,
    /// Current head of the mailbox history — the next change cursor.
    pub history_cursor: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRef {
    pub id: String,
    pub thread_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct MessagePage {
    pub messages: Vec<MessageRef>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct HistoryPage {
    pub added: Vec<MessageRef>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Header {
    pub name: String,
    pub value: String,
}

/// One node of a MIME part tree. `body_data` is base64url as delivered by
/// the upstream; decoding happens in [`crate::inbox::decode`].
#[derive(Debug, Clone, Default)]
pub struct MessagePart {
    pub mime_type: String,
    pub headers: Vec<Header>,
    pub body_data: Option<String>,
    pub parts: Vec<MessagePart>,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub id: String,
    pub thread_id: String,
    pub label_ids: Vec<String>,
    pub received_at: DateTime<Utc>,
    pub payload: MessagePart,
}

impl Message {
    /// Case-insensitive header lookup on the top-level part.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.payload
            .headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Thread {
    pub id: String,
    pub message_count: usize,
}

#[async_trait]
pub trait InboxApi: Send + Sync {
    async fn get_profile(&self, token: &AccessToken) -> Result<InboxProfile, InboxError>;

    async fn list_messages(
        &self,
        token: &AccessToken,
        query: &str,
        max_results: u32,
        page_token: Option<&str>,
    ) -> Result<MessagePage, InboxError>;

    async fn get_message(&self, token: &AccessToken, id: &str) -> Result<Message, InboxError>;

    async fn get_thread(&self, token: &AccessToken, id: &str) -> Result<Thread, InboxError>;

    /// Changes since `cursor`. A stale cursor yields
    /// [`InboxError::CursorExpired`].
    async fn list_history(
        &self,
        token: &AccessToken,
        cursor: &str,
        page_token: Option<&str>,
    ) -> Result<HistoryPage, InboxError>;
}

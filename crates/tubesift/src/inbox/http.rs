//! Gmail REST implementation of [`InboxApi`].

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::debug;

use super::api::{
    AccessToken, Header, HistoryPage, InboxApi, InboxProfile, Message, MessagePage, MessagePart,
    MessageRef, Thread,
};
use super::InboxError;

const DEFAULT_BASE_URL: &str = "https://gmail.googleapis.com/gmail/v1";

/// Truncation bound for upstream error bodies carried into our errors.
const MAX_ERROR_BODY_LENGTH: usize = 200;

pub struct GmailApi {
    http: Client,
    base_url: String,
}

impl GmailApi {
    pub fn new() -> Result<Self, InboxError> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self, InboxError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| InboxError::Protocol(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn get(&self, token: &AccessToken, path: &str) -> RequestBuilder {
        self.http
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(token.expose_secret())
    }

    async fn check(&self, response: Response) -> Result<Response, InboxError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let body = response.text().await.unwrap_or_default();
        let body = truncate_error_body(&body);

        Err(match status {
            StatusCode::UNAUTHORIZED => InboxError::Unauthorized,
            StatusCode::NOT_FOUND => InboxError::NotFound(body),
            StatusCode::TOO_MANY_REQUESTS => InboxError::RateLimited {
                retry_after_secs: retry_after,
            },
            s if s.is_server_error() => InboxError::Transient(format!("{}: {}", s, body)),
            s => InboxError::Protocol(format!("{}: {}", s, body)),
        })
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, InboxError> {
        let response = request
            .send()
            .await
            .map_err(|e| InboxError::Transient(e.to_string()))?;
        let response = self.check(response).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| InboxError::Protocol(e.to_string()))
    }
}

fn truncate_error_body(body: &str) -> String {
    if body.len() > MAX_ERROR_BODY_LENGTH {
        let cut = body
            .char_indices()
            .take_while(|(i, _)| *i < MAX_ERROR_BODY_LENGTH)
            .map(|(i, c)| i + c.len_utf8())
            .last()
            .unwrap_or(0);
        format!("{}... (truncated)", &body[..cut])
    } else {
        body.to_string()
    }
}

// ── Wire DTOs ──

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileDto {
    email_address: String,
    history_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageRefDto {
    id: String,
    #[serde(default)]
    thread_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageListDto {
    #[serde(default)]
    messages: Vec<MessageRefDto>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HeaderDto {
    name: String,
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BodyDto {
    #[serde(default)]
    data: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PartDto {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    headers: Vec<HeaderDto>,
    #[serde(default)]
    body: Option<BodyDto>,
    #[serde(default)]
    parts: Vec<PartDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageDto {
    id: String,
    #[serde(default)]
    thread_id: String,
    #[serde(default)]
    label_ids: Vec<String>,
    /// Epoch milliseconds, as a string.
    #[serde(default)]
    internal_date: Option<String>,
    #[serde(default)]
    payload: Option<PartDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThreadDto {
    id: String,
    #[serde(default)]
    messages: Vec<MessageRefDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryEntryDto {
    #[serde(default)]
    messages_added: Vec<HistoryMessageDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryMessageDto {
    message: MessageRefDto,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryListDto {
    #[serde(default)]
    history: Vec<HistoryEntryDto>,
    #[serde(default)]
    next_page_token: Option<String>,
}

fn convert_part(dto: PartDto) -> MessagePart {
    MessagePart {
        mime_type: dto.mime_type,
        headers: dto
            .headers
            .into_iter()
            .map(|h| Header {
                name: h.name,
                value: h.value,
            })
            .collect(),
        body_data: dto.body.and_then(|b| b.data),
        parts: dto.parts.into_iter().map(convert_part).collect(),
    }
}

fn parse_internal_date(raw: Option<&str>) -> DateTime<Utc> {
    raw.and_then(|s| s.parse::<i64>().ok())
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now)
}

#[async_trait]
impl InboxApi for GmailApi {
    async fn get_profile(&self, token: &AccessToken) -> Result<InboxProfile, InboxError> {
        let dto: ProfileDto = self
            .get_json(self.get(token, "/users/me/profile"))
            .await?;
        Ok(InboxProfile {
            email_address: dto.email_address,
            history_cursor: dto.history_id,
        })
    }

    async fn list_messages(
        &self,
        token: &AccessToken,
        query: &str,
        max_results: u32,
        page_token: Option<&str>,
    ) -> Result<MessagePage, InboxError> {
        let mut request = self
            .get(token, "/users/me/messages")
            .query(&[("q", query)])
            .query(&[("maxResults", max_results.to_string())]);
        if let Some(page_token) = page_token {
            request = request.query(&[("pageToken", page_token)]);
        }

        let dto: MessageListDto = self.get_json(request).await?;
        debug!(count = dto.messages.len(), "listed messages");
        Ok(MessagePage {
            messages: dto
                .messages
                .into_iter()
                .map(|m| MessageRef {
                    id: m.id,
                    thread_id: m.thread_id,
                })
                .collect(),
            next_page_token: dto.next_page_token,
        })
    }

    async fn get_message(&self, token: &AccessToken, id: &str) -> Result<Message, InboxError> {
        let request = self
            .get(token, &format!("/users/me/messages/{}", id))
            .query(&[("format", "full")]);
        let dto: MessageDto = self.get_json(request).await?;
        Ok(Message {
            received_at: parse_internal_date(dto.internal_date.as_deref()),
            id: dto.id,
            thread_id: dto.thread_id,
            label_ids: dto.label_ids,
            payload: dto.payload.map(convert_part).unwrap_or_default(),
        })
    }

    async fn get_thread(&self, token: &AccessToken, id: &str) -> Result<Thread, InboxError> {
        let request = self
            .get(token, &format!("/users/me/threads/{}", id))
            .query(&[("format", "minimal")]);
        let dto: ThreadDto = self.get_json(request).await?;
        Ok(Thread {
            id: dto.id,
            message_count: dto.messages.len(),
        })
    }

    async fn list_history(
        &self,
        token: &AccessToken,
        cursor: &str,
        page_token: Option<&str>,
    ) -> Result<HistoryPage, InboxError> {
        let mut request = self
            .get(token, "/users/me/history")
            .query(&[("startHistoryId", cursor)])
            .query(&[("historyTypes", "messageAdded")]);
        if let Some(page_token) = page_token {
            request = request.query(&[("pageToken", page_token)]);
        }

        // Gmail answers 404 for a cursor that has aged out of its history
        // window; the synchronizer falls back to a fresh bounded sync.
        let dto: HistoryListDto = match self.get_json(request).await {
            Ok(dto) => dto,
            Err(InboxError::NotFound(_)) => return Err(InboxError::CursorExpired),
            Err(e) => return Err(e),
        };

        Ok(HistoryPage {
            added: dto
                .history
                .into_iter()
                .flat_map(|h| h.messages_added)
                .map(|m| MessageRef {
                    id: m.message.id,
                    thread_id: m.message.thread_id,
                })
                .collect(),
            next_page_token: dto.next_page_token,
        })
    }
}

//! Incremental inbox synchronizer.
//!
//! Advances a user's change cursor to the current head of the mailbox,
//! enqueueing one email-process job per newly observed message. The head
//! cursor is fetched before listing and persisted only after every page has
//! been enqueued, so a failed pass leaves the cursor untouched and the next
//! pass re-covers the same ground (queue dedup absorbs the repeats).

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::InboxConfig;
use crate::db::{user_repo, Database};
use crate::error::Result;
use crate::inbox::auth::CredentialStore;
use crate::queue::{EmailProcessPayload, JobPayload, JobQueue, QueueName};

use super::api::{AccessToken, HistoryPage, InboxApi, MessagePage, MessageRef};
use super::InboxError;

/// Coarse pre-filter for the bounded initial sync: only mail that can
/// plausibly contain a YouTube reference.
const YOUTUBE_QUERY: &str = "youtube.com OR youtu.be";

type OpFuture<'a, T> = Pin<Box<dyn Future<Output = std::result::Result<T, InboxError>> + Send + 'a>>;

#[derive(Debug)]
pub struct SyncOutcome {
    pub enqueued: usize,
    pub cursor: String,
}

pub struct InboxSynchronizer {
    api: Arc<dyn InboxApi>,
    credentials: Arc<CredentialStore>,
    db: Database,
    queue: Arc<JobQueue>,
    config: InboxConfig,
}

impl InboxSynchronizer {
    pub fn new(
        api: Arc<dyn InboxApi>,
        credentials: Arc<CredentialStore>,
        db: Database,
        queue: Arc<JobQueue>,
        config: InboxConfig,
    ) -> Self {
        Self {
            api,
            credentials,
            db,
            queue,
            config,
        }
    }

    /// One full catch-up pass for a user.
    pub async fn run_for_user(&self, user_id: &str) -> Result<SyncOutcome> {
        debug!(user_id, "starting sync pass");
        let token = self.credentials.access_token_for(user_id).await?;
        match self.sync_pass(user_id, &token).await {
            Err(crate::error::TubesiftError::Inbox(InboxError::Unauthorized)) => {
                // Locally-fresh token rejected upstream: refresh once and
                // retry the pass. A revoked grant surfaces from the refresh.
                warn!(user_id, "token rejected upstream, forcing refresh");
                let token = self.credentials.force_refresh(user_id).await?;
                self.sync_pass(user_id, &token).await
            }
            other => other,
        }
    }

    async fn sync_pass(&self, user_id: &str, token: &AccessToken) -> Result<SyncOutcome> {
        let user = self
            .db
            .with_conn(|conn| user_repo::find_by_id(conn, user_id))?
            .ok_or_else(|| super::AuthError::UnknownUser(user_id.to_string()))?;

        // Head cursor first: anything arriving between this read and the
        // listing below is covered by the next pass.
        let profile = self
            .with_retry("get_profile", || self.api.get_profile(token))
            .await?;

        let refs = match &user.history_cursor {
            Some(cursor) => match self.collect_history(token, cursor).await {
                Ok(refs) => refs,
                Err(InboxError::CursorExpired) => {
                    warn!(user_id, "change cursor expired, falling back to bounded sync");
                    self.collect_initial(token).await?
                }
                Err(e) => return Err(e.into()),
            },
            None => {
                info!(user_id, "no cursor stored, performing bounded initial sync");
                self.collect_initial(token).await?
            }
        };

        let mut enqueued = 0;
        for message in &refs {
            let payload = EmailProcessPayload::new(user_id, &message.id);
            let job_id = payload.job_id();
            if self.queue.enqueue(
                QueueName::EmailProcess,
                &job_id,
                &JobPayload::EmailProcess(payload),
                Utc::now(),
                None,
            )? {
                enqueued += 1;
            }
        }

        // Every page is enqueued; only now may the cursor move.
        self.db.with_conn(|conn| {
            user_repo::set_cursor(conn, user_id, &profile.history_cursor, Utc::now())
        })?;

        info!(
            user_id,
            observed = refs.len(),
            enqueued,
            cursor = %profile.history_cursor,
            "sync pass committed"
        );
        Ok(SyncOutcome {
            enqueued,
            cursor: profile.history_cursor,
        })
    }

    async fn collect_initial(
        &self,
        token: &AccessToken,
    ) -> std::result::Result<Vec<MessageRef>, InboxError> {
        let limit = self.config.initial_sync_limit as usize;
        let mut refs: Vec<MessageRef> = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let max_results = (limit - refs.len()).min(self.config.page_size as usize) as u32;
            let page = self
                .with_retry("list_messages", || {
                    let page_token = page_token.clone();
                    Box::pin(async move {
                        self.api
                            .list_messages(token, YOUTUBE_QUERY, max_results, page_token.as_deref())
                            .await
                    }) as OpFuture<'_, MessagePage>
                })
                .await?;

            refs.extend(page.messages);
            page_token = page.next_page_token;
            if page_token.is_none() || refs.len() >= limit {
                break;
            }
        }

        refs.truncate(limit);
        Ok(refs)
    }

    async fn collect_history(
        &self,
        token: &AccessToken,
        cursor: &str,
    ) -> std::result::Result<Vec<MessageRef>, InboxError> {
        let mut seen = HashSet::new();
        let mut refs: Vec<MessageRef> = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page = self
                .with_retry("list_history", || {
                    let page_token = page_token.clone();
                    Box::pin(async move {
                        self.api
                            .list_history(token, cursor, page_token.as_deref())
                            .await
                    }) as OpFuture<'_, HistoryPage>
                })
                .await?;

            for message in page.added {
                if seen.insert(message.id.clone()) {
                    refs.push(message);
                }
            }
            page_token = page.next_page_token;
            if page_token.is_none() {
                break;
            }
        }

        debug!(count = refs.len(), "history delta collected");
        Ok(refs)
    }

    /// Bounded in-process retry for transient upstream failures. Anything
    /// else (revocation, expired cursor, protocol errors) passes straight
    /// through.
    async fn with_retry<'a, T, F>(
        &self,
        op: &'static str,
        f: F,
    ) -> std::result::Result<T, InboxError>
    where
        F: Fn() -> OpFuture<'a, T>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match f().await {
                Ok(value) => return Ok(value),
                Err(e @ (InboxError::Transient(_) | InboxError::RateLimited { .. }))
                    if attempt < self.config.max_attempts =>
                {
                    let delay = match &e {
                        InboxError::RateLimited {
                            retry_after_secs: Some(secs),
                        } => Duration::from_secs(*secs),
                        _ => Duration::from_millis(
                            self.config.retry_base_ms * 2u64.saturating_pow(attempt - 1),
                        ),
                    };
                    warn!(
                        op,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "transient inbox failure, retrying: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

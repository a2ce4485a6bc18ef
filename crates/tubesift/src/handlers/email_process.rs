//! Email processor: decode one message, persist its email and link rows,
//! update sender aggregates, and fan out the next pipeline stage.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::db::{email_repo, link_repo, sender_repo, Database};
use crate::error::Result;
use crate::inbox::auth::CredentialStore;
use crate::inbox::{decode, InboxApi};
use crate::links;
use crate::queue::{
    EmailProcessPayload, EnrichPayload, JobHandler, JobOutcome, JobPayload, JobQueue, JobRecord,
    QueueName, RankComputePayload,
};

const SNIPPET_MAX_CHARS: usize = 200;

pub struct EmailProcessHandler {
    db: Database,
    queue: Arc<JobQueue>,
    api: Arc<dyn InboxApi>,
    credentials: Arc<CredentialStore>,
}

impl EmailProcessHandler {
    pub fn new(
        db: Database,
        queue: Arc<JobQueue>,
        api: Arc<dyn InboxApi>,
        credentials: Arc<CredentialStore>,
    ) -> Self {
        Self {
            db,
            queue,
            api,
            credentials,
        }
    }

    async fn process(&self, payload: &EmailProcessPayload) -> Result<()> {
        let user_id = &payload.user_id;

        // Idempotency fast path: the row existing proves a prior delivery
        // got through its transaction. Next-stage jobs are still (re)filed
        // in case the crash happened between commit and enqueue.
        let existing = self.db.with_conn(|conn| {
            email_repo::find_by_message_id(conn, user_id, &payload.message_id)
        })?;
        if let Some(email) = existing {
            debug!(user_id = %user_id, message_id = %payload.message_id, "email already processed");
            return self.enqueue_next_stages(user_id, &email.id);
        }

        // External reads happen before the transaction opens.
        let token = self.credentials.access_token_for(user_id).await?;
        let message = self.api.get_message(&token, &payload.message_id).await?;
        let thread = self.api.get_thread(&token, &message.thread_id).await?;
        // Replies = messages in the thread besides the first.
        let thread_reply_count = thread.message_count.saturating_sub(1) as i64;

        let text = decode::extract_text(&message.payload);
        let extracted = links::extract_and_canonicalize(&text);
        let (sender_name, sender_address) =
            decode::parse_address(message.header("From").unwrap_or(""));
        let subject = message.header("Subject").unwrap_or("").to_string();
        let now = Utc::now();

        let email_row = email_repo::EmailRow {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.clone(),
            message_id: payload.message_id.clone(),
            thread_id: message.thread_id.clone(),
            sender_address: sender_address.clone(),
            sender_name,
            subject,
            received_at: message.received_at,
            snippet: decode::snippet(&text, SNIPPET_MAX_CHARS),
            labels: message.label_ids.clone(),
            thread_reply_count,
            created_at: now,
        };

        // One transaction for every write of this message.
        self.db.with_tx(|tx| {
            if !email_repo::insert_ignore(tx, &email_row)? {
                // A concurrent delivery won the race; its writes stand.
                return Ok(());
            }

            for link in extracted.iter() {
                // Playlist-only references carry no video identity and are
                // not persisted as link rows.
                let Some(video_id) = &link.video_id else {
                    continue;
                };
                let is_duplicate = link_repo::exists_for_user_video(tx, user_id, video_id)?;
                link_repo::insert_ignore(
                    tx,
                    &link_repo::LinkRow {
                        id: Uuid::new_v4().to_string(),
                        user_id: user_id.clone(),
                        email_id: email_row.id.clone(),
                        video_id: video_id.clone(),
                        playlist_id: link.playlist_id.clone(),
                        canonical_url: link.canonical_url.clone(),
                        is_duplicate,
                        extracted_at: now,
                    },
                )?;
            }

            if !sender_address.is_empty() {
                sender_repo::record_email(tx, user_id, &sender_address, message.received_at, now)?;
            }
            Ok(())
        })?;

        debug!(
            user_id = %user_id,
            message_id = %payload.message_id,
            links = extracted.len(),
            "email persisted"
        );

        // Next-stage jobs go out only after the commit above.
        self.enqueue_next_stages(user_id, &email_row.id)
    }

    /// Files an enrich job per link without metadata and a rank job per
    /// link that already has it. Queue dedup absorbs repeats.
    fn enqueue_next_stages(&self, user_id: &str, email_id: &str) -> Result<()> {
        let (email_links, unenriched) = self.db.with_conn(|conn| {
            Ok((
                link_repo::list_for_email(conn, email_id)?,
                link_repo::list_for_email_missing_metadata(conn, email_id)?,
            ))
        })?;
        let unenriched: HashSet<String> = unenriched.into_iter().map(|l| l.id).collect();
        let now = Utc::now();

        for link in email_links {
            if unenriched.contains(&link.id) {
                let payload = EnrichPayload::new(user_id, &link.id, &link.video_id);
                self.queue.enqueue(
                    QueueName::Enrich,
                    &payload.job_id(),
                    &JobPayload::Enrich(payload),
                    now,
                    None,
                )?;
            } else {
                let payload = RankComputePayload::new(user_id, &link.id);
                self.queue.enqueue(
                    QueueName::RankCompute,
                    &payload.job_id(),
                    &JobPayload::RankCompute(payload),
                    now,
                    None,
                )?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl JobHandler for EmailProcessHandler {
    fn queue(&self) -> QueueName {
        QueueName::EmailProcess
    }

    async fn execute(&self, job: &JobRecord) -> JobOutcome {
        let JobPayload::EmailProcess(payload) = &job.payload else {
            return JobOutcome::Failed(format!(
                "unexpected payload on email_process queue: {:?}",
                job.payload
            ));
        };
        match self.process(payload).await {
            Ok(()) => JobOutcome::Completed,
            Err(e) => {
                warn!(job_id = %job.job_id, "email processing failed: {}", e);
                JobOutcome::Failed(e.to_string())
            }
        }
    }
}

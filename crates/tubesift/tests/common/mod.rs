//! Test harness for pipeline integration tests: in-memory database and
//! key-value store, scripted inbox and video APIs, and helpers to drive
//! jobs through the queue the way the worker pool would.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use secrecy::SecretString;

use tubesift::config::{QueuePolicy, RankingConfig, YouTubeConfig};
use tubesift::db::{user_repo, Database};
use tubesift::handlers::{EmailProcessHandler, EnrichHandler, RankComputeHandler};
use tubesift::inbox::{
    AccessToken, CredentialSet, CredentialStore, Header, HistoryPage, InboxApi, InboxError,
    InboxProfile, InboxSynchronizer, Message, MessagePage, MessagePart, MessageRef, Thread,
    TokenRefresher,
};
use tubesift::kv::MemoryKv;
use tubesift::queue::{JobHandler, JobOutcome, JobQueue, QueueName};
use tubesift::ranking::Ranker;
use tubesift::secrets::CredentialSealer;
use tubesift::youtube::{
    CircuitBreaker, Snippet, VideoApi, VideoApiError, VideoItem, YouTubeClient,
};

/// Scripted inbox: a fixed message store, a single-page history delta, and
/// an optional transient-failure budget.
#[derive(Default)]
pub struct FakeInbox {
    pub cursor_head: Mutex<String>,
    pub messages: Mutex<HashMap<String, Message>>,
    /// Ids returned by the bounded listing, most recent first.
    pub listing: Mutex<Vec<String>>,
    /// Ids returned as the history delta.
    pub history_delta: Mutex<Vec<String>>,
    pub thread_sizes: Mutex<HashMap<String, usize>>,
    pub cursor_expired: Mutex<bool>,
    /// Next N API calls fail with a transient error.
    pub transient_failures: AtomicUsize,
    pub calls: AtomicUsize,
}

impl FakeInbox {
    pub fn new() -> Arc<Self> {
        let fake = Self::default();
        *fake.cursor_head.lock().unwrap() = "cursor-1".to_string();
        Arc::new(fake)
    }

    pub fn add_message(&self, message: Message, listed: bool) {
        let id = message.id.clone();
        self.thread_sizes
            .lock()
            .unwrap()
            .entry(message.thread_id.clone())
            .or_insert(1);
        self.messages.lock().unwrap().insert(id.clone(), message);
        if listed {
            self.listing.lock().unwrap().push(id);
        }
    }

    pub fn set_thread_size(&self, thread_id: &str, size: usize) {
        self.thread_sizes
            .lock()
            .unwrap()
            .insert(thread_id.to_string(), size);
    }

    pub fn set_cursor_head(&self, cursor: &str) {
        *self.cursor_head.lock().unwrap() = cursor.to_string();
    }

    pub fn set_history_delta(&self, ids: &[&str]) {
        *self.history_delta.lock().unwrap() = ids.iter().map(|s| s.to_string()).collect();
    }

    fn maybe_fail(&self) -> Result<(), InboxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(InboxError::Transient("scripted failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl InboxApi for FakeInbox {
    async fn get_profile(&self, _token: &AccessToken) -> Result<InboxProfile, InboxError> {
        self.maybe_fail()?;
        Ok(InboxProfile {
            email_address: "user@example.com".to_string(),
            history_cursor: self.cursor_head.lock().unwrap().clone(),
        })
    }

    async fn list_messages(
        &self,
        _token: &AccessToken,
        _query: &str,
        max_results: u32,
        _page_token: Option<&str>,
    ) -> Result<MessagePage, InboxError> {
        self.maybe_fail()?;
        let messages = self.messages.lock().unwrap();
        let refs = self
            .listing
            .lock()
            .unwrap()
            .iter()
            .take(max_results as usize)
            .filter_map(|id| {
                messages.get(id).map(|m| MessageRef {
                    id: m.id.clone(),
                    thread_id: m.thread_id.clone(),
                })
            })
            .collect();
        Ok(MessagePage {
            messages: refs,
            next_page_token: None,
        })
    }

    async fn get_message(&self, _token: &AccessToken, id: &str) -> Result<Message, InboxError> {
        self.maybe_fail()?;
        self.messages
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| InboxError::NotFound(id.to_string()))
    }

    async fn get_thread(&self, _token: &AccessToken, id: &str) -> Result<Thread, InboxError> {
        self.maybe_fail()?;
        let size = self
            .thread_sizes
            .lock()
            .unwrap()
            .get(id)
            .copied()
            .unwrap_or(1);
        Ok(Thread {
            id: id.to_string(),
            message_count: size,
        })
    }

    async fn list_history(
        &self,
        _token: &AccessToken,
        _cursor: &str,
        _page_token: Option<&str>,
    ) -> Result<HistoryPage, InboxError> {
        self.maybe_fail()?;
        if *self.cursor_expired.lock().unwrap() {
            return Err(InboxError::CursorExpired);
        }
        let messages = self.messages.lock().unwrap();
        let added = self
            .history_delta
            .lock()
            .unwrap()
            .iter()
            .filter_map(|id| {
                messages.get(id).map(|m| MessageRef {
                    id: m.id.clone(),
                    thread_id: m.thread_id.clone(),
                })
            })
            .collect();
        Ok(HistoryPage {
            added,
            next_page_token: None,
        })
    }
}

/// Scripted video API: answers for every requested id unless told to fail.
#[derive(Default)]
pub struct FakeVideoApi {
    pub calls: AtomicUsize,
    pub fail_with_quota: Mutex<bool>,
    pub transient_failures: AtomicUsize,
    /// Ids the upstream pretends not to know.
    pub unknown_ids: Mutex<Vec<String>>,
}

impl FakeVideoApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl VideoApi for FakeVideoApi {
    async fn list_videos(&self, ids: &[String]) -> Result<Vec<VideoItem>, VideoApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail_with_quota.lock().unwrap() {
            return Err(VideoApiError::QuotaExceeded);
        }
        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(VideoApiError::Transient("scripted failure".to_string()));
        }
        let unknown = self.unknown_ids.lock().unwrap();
        Ok(ids
            .iter()
            .filter(|id| !unknown.contains(id))
            .map(|id| VideoItem {
                id: id.clone(),
                snippet: Some(Snippet {
                    title: format!("Rust video {}", id),
                    channel_id: format!("UC-{}", &id[..4.min(id.len())]),
                    channel_title: "Channel".to_string(),
                    published_at: "2026-05-30T10:00:00Z".to_string(),
                    description: "deep dive into rust async programming".to_string(),
                    category_id: "28".to_string(),
                    thumbnails: None,
                }),
                content_details: Some(tubesift::youtube::ContentDetails {
                    duration: Some("PT10M".to_string()),
                }),
                statistics: Some(tubesift::youtube::Statistics {
                    view_count: Some("1000".to_string()),
                    like_count: Some("100".to_string()),
                }),
            })
            .collect())
    }
}

pub struct TestHarness {
    pub db: Database,
    pub kv: Arc<MemoryKv>,
    pub queue: Arc<JobQueue>,
    pub inbox: Arc<FakeInbox>,
    pub videos: Arc<FakeVideoApi>,
    pub credentials: Arc<CredentialStore>,
}

impl TestHarness {
    pub fn new() -> Self {
        let db = Database::open_in_memory().expect("in-memory database");
        let kv = Arc::new(MemoryKv::new());
        let queue = Arc::new(JobQueue::new(db.clone()));
        let credentials = Arc::new(CredentialStore::new(
            db.clone(),
            CredentialSealer::from_key_bytes(&[9u8; 32]).expect("test key"),
            TokenRefresher::new(
                "http://localhost:1/token",
                SecretString::from("test-client"),
                SecretString::from("test-secret"),
            ),
        ));
        Self {
            db,
            kv,
            queue,
            inbox: FakeInbox::new(),
            videos: FakeVideoApi::new(),
            credentials,
        }
    }

    /// Inserts a user with non-expiring credentials so no refresh happens.
    pub fn seed_user(&self, user_id: &str, learning_goals: &[&str]) {
        self.db
            .with_conn(|conn| {
                user_repo::insert(
                    conn,
                    &user_repo::UserRow {
                        id: user_id.to_string(),
                        email_address: format!("{}@example.com", user_id),
                        credential_cipher: None,
                        credential_nonce: None,
                        history_cursor: None,
                        preferences: user_repo::UserPreferences {
                            learning_goals: learning_goals
                                .iter()
                                .map(|g| g.to_string())
                                .collect(),
                            extra: Default::default(),
                        },
                        needs_reauth: false,
                        created_at: Utc::now(),
                        updated_at: Utc::now(),
                    },
                )
            })
            .expect("seed user");
        self.credentials
            .store(
                user_id,
                &CredentialSet {
                    access_token: "test-access-token".to_string(),
                    refresh_token: "test-refresh-token".to_string(),
                    expires_at: None,
                },
            )
            .expect("seed credentials");
    }

    pub fn synchronizer(&self) -> InboxSynchronizer {
        InboxSynchronizer::new(
            self.inbox.clone(),
            self.credentials.clone(),
            self.db.clone(),
            self.queue.clone(),
            tubesift::config::InboxConfig {
                retry_base_ms: 1,
                ..Default::default()
            },
        )
    }

    pub fn email_handler(&self) -> EmailProcessHandler {
        EmailProcessHandler::new(
            self.db.clone(),
            self.queue.clone(),
            self.inbox.clone(),
            self.credentials.clone(),
        )
    }

    pub fn youtube_client(&self) -> Arc<YouTubeClient> {
        let config = YouTubeConfig {
            retry_base_ms: 1,
            ..Default::default()
        };
        let breaker = CircuitBreaker::new(
            self.kv.clone(),
            "youtube",
            3,
            Duration::from_millis(60_000),
        );
        Arc::new(YouTubeClient::new(
            self.videos.clone(),
            self.kv.clone(),
            breaker,
            config,
        ))
    }

    pub fn enrich_handler(&self) -> EnrichHandler {
        EnrichHandler::new(
            self.db.clone(),
            self.queue.clone(),
            self.youtube_client(),
            Duration::from_secs(3600),
        )
    }

    pub fn rank_handler(&self) -> RankComputeHandler {
        RankComputeHandler::new(
            self.db.clone(),
            Arc::new(Ranker::new(RankingConfig::default())),
        )
    }

    /// Drives queued jobs to completion the way the worker pool would,
    /// until every pipeline queue is idle.
    pub async fn run_pipeline_until_idle(&self) {
        let email = self.email_handler();
        let enrich = self.enrich_handler();
        let rank = self.rank_handler();
        let visibility = Duration::from_secs(300);
        let policy = QueuePolicy::default();

        loop {
            let mut progressed = false;
            let handlers: [(QueueName, &dyn JobHandler); 3] = [
                (QueueName::EmailProcess, &email),
                (QueueName::Enrich, &enrich),
                (QueueName::RankCompute, &rank),
            ];
            for (queue_name, handler) in handlers {
                while let Some(job) = self
                    .queue
                    .pull(queue_name, Utc::now(), visibility)
                    .expect("queue pull")
                {
                    let outcome = handler.execute(&job).await;
                    let now = Utc::now();
                    match outcome {
                        JobOutcome::Completed => {
                            self.queue.complete(queue_name, &job.job_id, now).unwrap();
                        }
                        JobOutcome::Failed(error) => {
                            self.queue
                                .fail(queue_name, &job.job_id, &error, now, &policy)
                                .unwrap();
                        }
                        JobOutcome::RetryAfter { delay, reason } => {
                            self.queue
                                .retry_later(queue_name, &job.job_id, delay, &reason, now)
                                .unwrap();
                        }
                    }
                    progressed = true;
                }
            }
            if !progressed {
                break;
            }
        }
    }
}

/// Builds a full message with a base64url-encoded plain-text body.
pub fn make_message(
    id: &str,
    thread_id: &str,
    from: &str,
    subject: &str,
    body: &str,
    received_at: DateTime<Utc>,
) -> Message {
    Message {
        id: id.to_string(),
        thread_id: thread_id.to_string(),
        label_ids: vec!["INBOX".to_string()],
        received_at,
        payload: MessagePart {
            mime_type: "multipart/alternative".to_string(),
            headers: vec![
                Header {
                    name: "From".to_string(),
                    value: from.to_string(),
                },
                Header {
                    name: "Subject".to_string(),
                    value: subject.to_string(),
                },
            ],
            body_data: None,
            parts: vec![MessagePart {
                mime_type: "text/plain".to_string(),
                headers: vec![],
                body_data: Some(URL_SAFE_NO_PAD.encode(body.as_bytes())),
                parts: vec![],
            }],
        },
    }
}

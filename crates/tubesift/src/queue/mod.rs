//! Durable job queue over the `job_tracking` table.
//!
//! Contract: at-least-once delivery, per-queue attempt caps with
//! exponential backoff, idempotency-key deduplication while a row is
//! retained, and visibility timeouts so a crashed worker's job is
//! redelivered instead of lost. Exactly-once is explicitly not promised;
//! handlers are idempotent.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use thiserror::Error;
use tracing::debug;

use crate::config::QueuePolicy;
use crate::db::{parse_ts, to_ts, Database, DatabaseError};

pub mod payload;
pub mod worker;

pub use payload::{
    EmailProcessPayload, EnrichPayload, InboxSyncPayload, JobPayload, RankComputePayload,
};
pub use worker::{JobHandler, JobOutcome, WorkerPool};

/// Completed jobs are kept for a day, failed jobs for a week.
pub const COMPLETED_RETENTION: Duration = Duration::from_secs(24 * 3600);
pub const FAILED_RETENTION: Duration = Duration::from_secs(7 * 24 * 3600);

const MAX_BACKOFF_SECS: u64 = 3600;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Invalid job payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Job {queue}:{job_id} not found")]
    NotFound { queue: String, job_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueName {
    InboxSync,
    EmailProcess,
    Enrich,
    RankCompute,
}

impl QueueName {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::InboxSync => "inbox_sync",
            QueueName::EmailProcess => "email_process",
            QueueName::Enrich => "enrich",
            QueueName::RankCompute => "rank_compute",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "queued" => Some(JobStatus::Queued),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobRecord {
    pub queue: String,
    pub job_id: String,
    pub payload: JobPayload,
    pub status: JobStatus,
    pub attempts: u32,
    pub next_visible_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    fn from_row(row: &Row<'_>) -> Result<Self, DatabaseError> {
        let payload: String = row.get("payload")?;
        let status: String = row.get("status")?;
        let next_visible_at: String = row.get("next_visible_at")?;
        let created_at: String = row.get("created_at")?;
        let updated_at: String = row.get("updated_at")?;
        let completed_at: Option<String> = row.get("completed_at")?;
        Ok(Self {
            queue: row.get("queue")?,
            job_id: row.get("job_id")?,
            payload: serde_json::from_str(&payload)?,
            status: JobStatus::parse(&status).ok_or(DatabaseError::InvalidEnum(status.clone()))?,
            attempts: row.get("attempts")?,
            next_visible_at: parse_ts(&next_visible_at)?,
            last_error: row.get("last_error")?,
            created_at: parse_ts(&created_at)?,
            updated_at: parse_ts(&updated_at)?,
            completed_at: completed_at.as_deref().map(parse_ts).transpose()?,
        })
    }
}

/// Delay before retry `attempt` (1-based): base × 2^(attempt−1), capped.
pub fn backoff_delay(base_secs: u64, attempt: u32) -> Duration {
    let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
    Duration::from_secs(base_secs.saturating_mul(factor).min(MAX_BACKOFF_SECS))
}

#[derive(Clone)]
pub struct JobQueue {
    db: Database,
}

impl JobQueue {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Enqueues unless a live row with the same idempotency key exists.
    /// Returns whether a new job was created.
    pub fn enqueue(
        &self,
        queue: QueueName,
        job_id: &str,
        payload: &JobPayload,
        now: DateTime<Utc>,
        delay: Option<Duration>,
    ) -> Result<bool, QueueError> {
        let visible_at = now + chrono::Duration::from_std(delay.unwrap_or_default()).unwrap();
        let payload_json = serde_json::to_string(payload)?;
        let changed = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "INSERT INTO job_tracking (queue, job_id, payload, status, attempts,
                 next_visible_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 'queued', 0, ?4, ?5, ?5)
                 ON CONFLICT (queue, job_id) DO NOTHING",
                params![
                    queue.as_str(),
                    job_id,
                    payload_json,
                    to_ts(visible_at),
                    to_ts(now),
                ],
            )?)
        })?;
        if changed > 0 {
            debug!(queue = queue.as_str(), job_id, "enqueued job");
        }
        Ok(changed > 0)
    }

    /// Pulls the next visible job, marking it running for `visibility`.
    /// A `running` row whose deadline passed is reclaimed here, which is how
    /// jobs stranded by a dead worker get redelivered.
    pub fn pull(
        &self,
        queue: QueueName,
        now: DateTime<Utc>,
        visibility: Duration,
    ) -> Result<Option<JobRecord>, QueueError> {
        let deadline = now + chrono::Duration::from_std(visibility).unwrap();
        let record = self.db.with_tx(|tx| {
            let candidate = {
                let mut stmt = tx.prepare(
                    "SELECT * FROM job_tracking
                     WHERE queue = ?1 AND status IN ('queued', 'running')
                       AND next_visible_at <= ?2
                     ORDER BY next_visible_at
                     LIMIT 1",
                )?;
                stmt.query_row(params![queue.as_str(), to_ts(now)], |row| {
                    Ok(JobRecord::from_row(row))
                })
                .optional()?
                .transpose()?
            };

            let Some(mut job) = candidate else {
                return Ok(None);
            };

            tx.execute(
                "UPDATE job_tracking
                 SET status = 'running', attempts = attempts + 1,
                     next_visible_at = ?3, updated_at = ?4
                 WHERE queue = ?1 AND job_id = ?2",
                params![
                    queue.as_str(),
                    job.job_id,
                    to_ts(deadline),
                    to_ts(now)
                ],
            )?;
            job.status = JobStatus::Running;
            job.attempts += 1;
            job.next_visible_at = deadline;
            Ok(Some(job))
        })?;
        Ok(record)
    }

    pub fn complete(
        &self,
        queue: QueueName,
        job_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE job_tracking
                 SET status = 'completed', completed_at = ?3, updated_at = ?3
                 WHERE queue = ?1 AND job_id = ?2",
                params![queue.as_str(), job_id, to_ts(now)],
            )?;
            Ok(())
        })?;
        Ok(())
    }

    /// Records a failed attempt. Under the attempt cap the job is requeued
    /// with exponential backoff; at the cap it goes terminal.
    pub fn fail(
        &self,
        queue: QueueName,
        job_id: &str,
        error: &str,
        now: DateTime<Utc>,
        policy: &QueuePolicy,
    ) -> Result<JobStatus, QueueError> {
        let max_attempts = policy.attempts;
        let base = policy.backoff_base_secs;
        let status = self.db.with_tx(|tx| {
            let attempts = current_attempts(tx, queue, job_id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)?;
            let (status, visible_at) = if attempts >= max_attempts {
                (JobStatus::Failed, now)
            } else {
                let delay = backoff_delay(base, attempts);
                (
                    JobStatus::Queued,
                    now + chrono::Duration::from_std(delay).unwrap(),
                )
            };
            tx.execute(
                "UPDATE job_tracking
                 SET status = ?3, last_error = ?4, next_visible_at = ?5, updated_at = ?6
                 WHERE queue = ?1 AND job_id = ?2",
                params![
                    queue.as_str(),
                    job_id,
                    status.as_str(),
                    error,
                    to_ts(visible_at),
                    to_ts(now),
                ],
            )?;
            Ok(status)
        })?;
        Ok(status)
    }

    /// Requeues without consuming an attempt — used when the failure is a
    /// quota window, not the job itself (the attempt taken at pull time is
    /// refunded).
    pub fn retry_later(
        &self,
        queue: QueueName,
        job_id: &str,
        delay: Duration,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        let visible_at = now + chrono::Duration::from_std(delay).unwrap();
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE job_tracking
                 SET status = 'queued', attempts = max(attempts - 1, 0),
                     last_error = ?3, next_visible_at = ?4, updated_at = ?5
                 WHERE queue = ?1 AND job_id = ?2",
                params![
                    queue.as_str(),
                    job_id,
                    reason,
                    to_ts(visible_at),
                    to_ts(now)
                ],
            )?;
            Ok(())
        })?;
        Ok(())
    }

    /// Deletes terminal rows past their retention window, which also
    /// reopens their idempotency keys.
    pub fn sweep(&self, now: DateTime<Utc>) -> Result<usize, QueueError> {
        let completed_cutoff = now - chrono::Duration::from_std(COMPLETED_RETENTION).unwrap();
        let failed_cutoff = now - chrono::Duration::from_std(FAILED_RETENTION).unwrap();
        let removed = self.db.with_conn(|conn| {
            let a = conn.execute(
                "DELETE FROM job_tracking WHERE status = 'completed' AND completed_at < ?1",
                params![to_ts(completed_cutoff)],
            )?;
            let b = conn.execute(
                "DELETE FROM job_tracking WHERE status = 'failed' AND updated_at < ?1",
                params![to_ts(failed_cutoff)],
            )?;
            Ok(a + b)
        })?;
        Ok(removed)
    }

    pub fn count_by_status(
        &self,
        queue: QueueName,
        status: JobStatus,
    ) -> Result<u64, QueueError> {
        let count = self.db.with_conn(|conn| {
            let count: u64 = conn.query_row(
                "SELECT COUNT(*) FROM job_tracking WHERE queue = ?1 AND status = ?2",
                params![queue.as_str(), status.as_str()],
                |r| r.get(0),
            )?;
            Ok(count)
        })?;
        Ok(count)
    }

    pub fn find(
        &self,
        queue: QueueName,
        job_id: &str,
    ) -> Result<Option<JobRecord>, QueueError> {
        let record = self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT * FROM job_tracking WHERE queue = ?1 AND job_id = ?2")?;
            stmt.query_row(params![queue.as_str(), job_id], |row| {
                Ok(JobRecord::from_row(row))
            })
            .optional()?
            .transpose()
        })?;
        Ok(record)
    }
}

fn current_attempts(
    conn: &Connection,
    queue: QueueName,
    job_id: &str,
) -> Result<Option<u32>, DatabaseError> {
    let attempts = conn
        .query_row(
            "SELECT attempts FROM job_tracking WHERE queue = ?1 AND job_id = ?2",
            params![queue.as_str(), job_id],
            |r| r.get::<_, u32>(0),
        )
        .optional()?;
    Ok(attempts)
}

//! Enrichment handler: resolve metadata for one link's video and hand the
//! link to the ranker.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};

use crate::db::{metadata_repo, Database};
use crate::queue::{
    EnrichPayload, JobHandler, JobOutcome, JobPayload, JobQueue, JobRecord, QueueName,
    RankComputePayload,
};
use crate::youtube::{EnrichError, YouTubeClient};

pub struct EnrichHandler {
    db: Database,
    queue: Arc<JobQueue>,
    client: Arc<YouTubeClient>,
    /// Requeue delay while the daily quota window is exhausted.
    quota_retry_delay: Duration,
}

impl EnrichHandler {
    pub fn new(
        db: Database,
        queue: Arc<JobQueue>,
        client: Arc<YouTubeClient>,
        quota_retry_delay: Duration,
    ) -> Self {
        Self {
            db,
            queue,
            client,
            quota_retry_delay,
        }
    }

    async fn enrich(&self, payload: &EnrichPayload) -> Result<JobOutcome, EnrichError> {
        let ids = [payload.video_id.clone()];
        let resolved = self.client.get_metadata(&ids).await?;

        let Some(meta) = resolved.get(&payload.video_id) else {
            // The upstream knows nothing about this id (deleted or private
            // video). Nothing to rank; done.
            warn!(video_id = %payload.video_id, "video unknown upstream, leaving link unranked");
            return Ok(JobOutcome::Completed);
        };

        // The relational store stays authoritative; the client already
        // wrote the cache.
        if let Err(e) = self.db.with_conn(|conn| metadata_repo::upsert(conn, meta)) {
            return Ok(JobOutcome::Failed(e.to_string()));
        }
        debug!(video_id = %payload.video_id, "metadata persisted");

        let rank = RankComputePayload::new(&payload.user_id, &payload.link_id);
        if let Err(e) = self.queue.enqueue(
            QueueName::RankCompute,
            &rank.job_id(),
            &JobPayload::RankCompute(rank),
            Utc::now(),
            None,
        ) {
            return Ok(JobOutcome::Failed(e.to_string()));
        }
        Ok(JobOutcome::Completed)
    }
}

#[async_trait]
impl JobHandler for EnrichHandler {
    fn queue(&self) -> QueueName {
        QueueName::Enrich
    }

    async fn execute(&self, job: &JobRecord) -> JobOutcome {
        let JobPayload::Enrich(payload) = &job.payload else {
            return JobOutcome::Failed(format!(
                "unexpected payload on enrich queue: {:?}",
                job.payload
            ));
        };

        match self.enrich(payload).await {
            Ok(outcome) => outcome,
            // Quota exhaustion is the window's fault, not the job's: park
            // the job past the rollover without burning an attempt.
            Err(EnrichError::QuotaExceeded) => JobOutcome::RetryAfter {
                delay: self.quota_retry_delay,
                reason: "daily quota exhausted".to_string(),
            },
            // Fast-fail and transient errors lean on queue retry policy.
            Err(e @ EnrichError::CircuitOpen) => JobOutcome::Failed(e.to_string()),
            Err(EnrichError::TransientUpstream(e)) => JobOutcome::Failed(e),
        }
    }
}

//! Rank computation: assemble the ranking context from persisted state,
//! score, and record the ranking. Serialized per user by queue concurrency,
//! so same-second upserts cannot race.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Timelike, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::db::{email_repo, link_repo, metadata_repo, ranking_repo, sender_repo, user_repo, Database};
use crate::queue::{JobHandler, JobOutcome, JobPayload, JobRecord, QueueName, RankComputePayload};
use crate::ranking::{RankingContext, Ranker};

pub struct RankComputeHandler {
    db: Database,
    ranker: Arc<Ranker>,
}

impl RankComputeHandler {
    pub fn new(db: Database, ranker: Arc<Ranker>) -> Self {
        Self { db, ranker }
    }

    fn compute(&self, payload: &RankComputePayload) -> Result<(), String> {
        let link = self
            .db
            .with_conn(|conn| link_repo::find_by_id(conn, &payload.link_id))
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("link '{}' not found", payload.link_id))?;
        let email = self
            .db
            .with_conn(|conn| email_repo::find_by_id(conn, &link.email_id))
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("email '{}' not found", link.email_id))?;
        let meta = self
            .db
            .with_conn(|conn| metadata_repo::find(conn, &link.video_id))
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("metadata for '{}' not yet available", link.video_id))?;
        let user = self
            .db
            .with_conn(|conn| user_repo::find_by_id(conn, &payload.user_id))
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("user '{}' not found", payload.user_id))?;
        let sender_stats = self
            .db
            .with_conn(|conn| sender_repo::find(conn, &payload.user_id, &email.sender_address))
            .map_err(|e| e.to_string())?;

        let description = meta.description_keywords.join(" ");
        // Second precision: a re-rank inside the same second updates the
        // existing row instead of growing history.
        let ranked_at = Utc::now().with_nanosecond(0).expect("zero nanoseconds");

        let ctx = RankingContext {
            sender_stats: sender_stats.as_ref(),
            thread_reply_count: email.thread_reply_count,
            received_at: email.received_at,
            published_at: meta.published_at,
            title: &meta.title,
            description: if description.is_empty() {
                None
            } else {
                Some(&description)
            },
            learning_goals: &user.preferences.learning_goals,
            now: ranked_at,
        };
        let outcome = self.ranker.rank(&ctx);

        self.db
            .with_conn(|conn| {
                ranking_repo::upsert(
                    conn,
                    &ranking_repo::RankingRow {
                        id: Uuid::new_v4().to_string(),
                        user_id: payload.user_id.clone(),
                        link_id: payload.link_id.clone(),
                        ranked_at,
                        sender_score: outcome.features.sender,
                        thread_score: outcome.features.thread,
                        freshness_score: outcome.features.freshness,
                        topic_score: outcome.features.topic,
                        noise_penalty: outcome.features.noise_penalty,
                        final_score: outcome.final_score,
                        classification: outcome.classification,
                        explanation: outcome.explanation.clone(),
                        topic_tags: outcome.topic_tags.clone(),
                    },
                )
            })
            .map_err(|e| e.to_string())?;

        debug!(
            link_id = %payload.link_id,
            score = outcome.final_score,
            classification = outcome.classification.as_str(),
            "ranking recorded"
        );
        Ok(())
    }
}

#[async_trait]
impl JobHandler for RankComputeHandler {
    fn queue(&self) -> QueueName {
        QueueName::RankCompute
    }

    async fn execute(&self, job: &JobRecord) -> JobOutcome {
        let JobPayload::RankCompute(payload) = &job.payload else {
            return JobOutcome::Failed(format!(
                "unexpected payload on rank_compute queue: {:?}",
                job.payload
            ));
        };
        match self.compute(payload) {
            Ok(()) => JobOutcome::Completed,
            Err(e) => {
                warn!(job_id = %job.job_id, "rank computation failed: {}", e);
                JobOutcome::Failed(e)
            }
        }
    }
}

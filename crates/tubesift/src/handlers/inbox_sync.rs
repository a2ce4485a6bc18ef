//! Inbox-sync handler: one job per (user, poll tick).

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::error::TubesiftError;
use crate::inbox::{AuthError, InboxSynchronizer};
use crate::queue::{JobHandler, JobOutcome, JobPayload, JobRecord, QueueName};

pub struct InboxSyncHandler {
    synchronizer: Arc<InboxSynchronizer>,
}

impl InboxSyncHandler {
    pub fn new(synchronizer: Arc<InboxSynchronizer>) -> Self {
        Self { synchronizer }
    }
}

#[async_trait]
impl JobHandler for InboxSyncHandler {
    fn queue(&self) -> QueueName {
        QueueName::InboxSync
    }

    async fn execute(&self, job: &JobRecord) -> JobOutcome {
        let JobPayload::InboxSync(payload) = &job.payload else {
            return JobOutcome::Failed(format!(
                "unexpected payload on inbox_sync queue: {:?}",
                job.payload
            ));
        };

        match self.synchronizer.run_for_user(&payload.user_id).await {
            Ok(_) => JobOutcome::Completed,
            // Revocation is handled (user flagged for re-auth); retrying
            // the job cannot help until the user re-authorizes.
            Err(TubesiftError::Auth(AuthError::Revoked)) => {
                warn!(user_id = %payload.user_id, "sync stopped: authorization revoked");
                JobOutcome::Completed
            }
            Err(e) => JobOutcome::Failed(e.to_string()),
        }
    }
}

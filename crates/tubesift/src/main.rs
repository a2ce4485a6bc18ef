//! Composition root: explicit construction at process start, dependency
//! injection into handlers, deterministic shutdown.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tubesift::config::{self, Config};
use tubesift::db::{user_repo, Database};
use tubesift::error::ConfigError;
use tubesift::handlers::{EmailProcessHandler, EnrichHandler, InboxSyncHandler, RankComputeHandler};
use tubesift::inbox::{CredentialStore, GmailApi, InboxApi, InboxSynchronizer, TokenRefresher};
use tubesift::kv::{KvStore, MemoryKv};
use tubesift::queue::{InboxSyncPayload, JobPayload, JobQueue, QueueName, WorkerPool};
use tubesift::ranking::Ranker;
use tubesift::secrets::{secret_from_env, CredentialSealer};
use tubesift::youtube::{CircuitBreaker, HttpVideoApi, VideoApi, YouTubeClient};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> tubesift::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "tubesift.json".to_string());
    let config = config::load_config(&config_path)?;
    info!(config = %config_path, "configuration loaded");

    let db = Database::open(&config.database.path)?;
    let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
    let queue = Arc::new(JobQueue::new(db.clone()));

    let credentials = Arc::new(build_credential_store(&config, db.clone())?);
    let inbox_api: Arc<dyn InboxApi> = Arc::new(GmailApi::new()?);

    let api_key = secret_from_env(&config.youtube.api_key_env_var)
        .map_err(|e| ConfigError::MissingCredential(e.to_string()))?;
    let video_api: Arc<dyn VideoApi> = Arc::new(HttpVideoApi::new(api_key));
    let breaker = CircuitBreaker::new(
        Arc::clone(&kv),
        "youtube",
        config.circuit_breaker.failure_threshold,
        Duration::from_millis(config.circuit_breaker.reset_timeout_ms),
    );
    let youtube = Arc::new(YouTubeClient::new(
        video_api,
        Arc::clone(&kv),
        breaker,
        config.youtube.clone(),
    ));

    let synchronizer = Arc::new(InboxSynchronizer::new(
        Arc::clone(&inbox_api),
        Arc::clone(&credentials),
        db.clone(),
        Arc::clone(&queue),
        config.inbox.clone(),
    ));

    let mut pool = WorkerPool::new(Arc::clone(&queue), Arc::clone(&kv), &config.workers);
    pool.register(
        Arc::new(InboxSyncHandler::new(synchronizer)),
        config.queues.inbox_sync.clone(),
    );
    pool.register(
        Arc::new(EmailProcessHandler::new(
            db.clone(),
            Arc::clone(&queue),
            inbox_api,
            credentials,
        )),
        config.queues.email_process.clone(),
    );
    pool.register(
        Arc::new(EnrichHandler::new(
            db.clone(),
            Arc::clone(&queue),
            youtube,
            Duration::from_secs(config.youtube.quota_retry_delay_secs),
        )),
        config.queues.enrich.clone(),
    );
    pool.register(
        Arc::new(RankComputeHandler::new(
            db.clone(),
            Arc::new(Ranker::new(config.ranking.clone())),
        )),
        config.queues.rank_compute.clone(),
    );

    let scheduler = tokio::spawn(run_scheduler(
        db,
        Arc::clone(&queue),
        config.workers.sync_interval_secs,
    ));

    wait_for_shutdown().await;
    info!("shutdown signal received, draining workers");
    scheduler.abort();
    pool.shutdown();
    pool.drain().await;
    Ok(())
}

fn build_credential_store(config: &Config, db: Database) -> tubesift::Result<CredentialStore> {
    let sealing_key = secret_from_env(&config.auth.encryption_key_env_var)
        .map_err(|e| ConfigError::MissingCredential(e.to_string()))?;
    let sealer = CredentialSealer::from_base64_key(&sealing_key)
        .map_err(|e| ConfigError::MissingCredential(e.to_string()))?;
    let refresher = TokenRefresher::from_config(&config.auth)?;
    Ok(CredentialStore::new(db, sealer, refresher))
}

/// Periodic tick: enqueue one sync job per active user (time-bucketed
/// idempotency key, so a tick never double-files) and run the queue
/// retention sweep.
async fn run_scheduler(db: Database, queue: Arc<JobQueue>, interval_secs: u64) {
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    loop {
        ticker.tick().await;
        let now = Utc::now();

        match db.with_conn(user_repo::list_active) {
            Ok(users) => {
                let bucket = now.timestamp() / interval_secs.max(1) as i64;
                for user in users {
                    let job_id = format!("{}:{}", user.id, bucket);
                    let payload = InboxSyncPayload {
                        user_id: user.id,
                        extra: Default::default(),
                    };
                    if let Err(e) = queue.enqueue(
                        QueueName::InboxSync,
                        &job_id,
                        &JobPayload::InboxSync(payload),
                        now,
                        None,
                    ) {
                        warn!("failed to enqueue sync job: {}", e);
                    }
                }
            }
            Err(e) => warn!("failed to list users for sync tick: {}", e),
        }

        if let Err(e) = queue.sweep(now) {
            warn!("retention sweep failed: {}", e);
        }
    }
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

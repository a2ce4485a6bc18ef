//! Worker pool binding job handlers to queues.
//!
//! Each registered handler gets `concurrency` long-lived tokio tasks
//! pulling one job at a time. On shutdown workers stop pulling, finish
//! their in-flight job inside the drain deadline, and anything slower is
//! reclaimed later through the queue's visibility timeout.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{QueuePolicy, WorkersConfig};
use crate::kv::{keys, KvStore};

use super::{JobQueue, JobRecord, QueueName};

/// What a handler did with a job.
#[derive(Debug)]
pub enum JobOutcome {
    Completed,
    /// Counts against the attempt cap and backs off per queue policy.
    Failed(String),
    /// Requeue after a fixed delay without consuming an attempt — for
    /// stalls that are not the job's fault (an exhausted quota window).
    RetryAfter { delay: Duration, reason: String },
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    fn queue(&self) -> QueueName;

    /// Must be idempotent: the queue delivers at least once.
    async fn execute(&self, job: &JobRecord) -> JobOutcome;
}

pub struct WorkerPool {
    queue: Arc<JobQueue>,
    kv: Arc<dyn KvStore>,
    shutdown: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
    poll_interval: Duration,
    visibility: Duration,
    drain_timeout: Duration,
}

impl WorkerPool {
    pub fn new(queue: Arc<JobQueue>, kv: Arc<dyn KvStore>, config: &WorkersConfig) -> Self {
        Self {
            queue,
            kv,
            shutdown: Arc::new(AtomicBool::new(false)),
            handles: Vec::new(),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            visibility: Duration::from_secs(config.visibility_timeout_secs),
            drain_timeout: Duration::from_secs(config.drain_timeout_secs),
        }
    }

    /// Spawns `policy.concurrency` workers for the handler's queue.
    pub fn register(&mut self, handler: Arc<dyn JobHandler>, policy: QueuePolicy) {
        let queue_name = handler.queue();
        for worker_id in 0..policy.concurrency {
            let ctx = WorkerContext {
                worker_id,
                queue_name,
                handler: Arc::clone(&handler),
                queue: Arc::clone(&self.queue),
                kv: Arc::clone(&self.kv),
                policy: policy.clone(),
                shutdown: Arc::clone(&self.shutdown),
                poll_interval: self.poll_interval,
                visibility: self.visibility,
            };
            self.handles.push(tokio::spawn(run_worker(ctx)));
        }
        info!(
            queue = queue_name.as_str(),
            concurrency = policy.concurrency,
            "registered workers"
        );
    }

    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Waits for workers to finish their in-flight jobs, up to the drain
    /// deadline. Stragglers are aborted; their jobs redeliver via the
    /// visibility timeout.
    pub async fn drain(self) {
        self.shutdown.store(true, Ordering::Relaxed);
        let deadline = tokio::time::Instant::now() + self.drain_timeout;

        for (i, mut handle) in self.handles.into_iter().enumerate() {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match tokio::time::timeout(remaining, &mut handle).await {
                Ok(Ok(())) => debug!("Worker {} finished", i),
                Ok(Err(e)) => error!("Worker {} panicked: {}", i, e),
                Err(_) => {
                    warn!("Worker {} exceeded drain deadline, aborting", i);
                    handle.abort();
                }
            }
        }

        info!("All workers have stopped");
    }
}

struct WorkerContext {
    worker_id: usize,
    queue_name: QueueName,
    handler: Arc<dyn JobHandler>,
    queue: Arc<JobQueue>,
    kv: Arc<dyn KvStore>,
    policy: QueuePolicy,
    shutdown: Arc<AtomicBool>,
    poll_interval: Duration,
    visibility: Duration,
}

async fn run_worker(ctx: WorkerContext) {
    debug!(
        queue = ctx.queue_name.as_str(),
        worker = ctx.worker_id,
        "worker started"
    );

    loop {
        if ctx.shutdown.load(Ordering::Relaxed) {
            break;
        }

        let job = match ctx.queue.pull(ctx.queue_name, Utc::now(), ctx.visibility) {
            Ok(Some(job)) => job,
            Ok(None) => {
                tokio::time::sleep(ctx.poll_interval).await;
                continue;
            }
            Err(e) => {
                error!(queue = ctx.queue_name.as_str(), "queue pull failed: {}", e);
                tokio::time::sleep(ctx.poll_interval).await;
                continue;
            }
        };

        if let Some(limit) = ctx.policy.rate_limit {
            throttle(&*ctx.kv, ctx.queue_name, limit.max_jobs, limit.window_secs).await;
        }

        debug!(
            queue = ctx.queue_name.as_str(),
            worker = ctx.worker_id,
            job_id = %job.job_id,
            attempt = job.attempts,
            "executing job"
        );

        let outcome = ctx.handler.execute(&job).await;
        let now = Utc::now();
        let result = match outcome {
            JobOutcome::Completed => ctx.queue.complete(ctx.queue_name, &job.job_id, now),
            JobOutcome::Failed(err) => {
                warn!(
                    queue = ctx.queue_name.as_str(),
                    job_id = %job.job_id,
                    attempt = job.attempts,
                    "job failed: {}",
                    err
                );
                ctx.queue
                    .fail(ctx.queue_name, &job.job_id, &err, now, &ctx.policy)
                    .map(|_| ())
            }
            JobOutcome::RetryAfter { delay, reason } => {
                info!(
                    queue = ctx.queue_name.as_str(),
                    job_id = %job.job_id,
                    delay_secs = delay.as_secs(),
                    "job deferred: {}",
                    reason
                );
                ctx.queue
                    .retry_later(ctx.queue_name, &job.job_id, delay, &reason, now)
            }
        };
        if let Err(e) = result {
            error!(
                queue = ctx.queue_name.as_str(),
                job_id = %job.job_id,
                "failed to record job outcome: {}",
                e
            );
        }
    }

    debug!(
        queue = ctx.queue_name.as_str(),
        worker = ctx.worker_id,
        "worker stopped"
    );
}

/// Fixed-window limiter shared across this queue's workers. When the window
/// is saturated, wait it out and take a slot in the next one.
async fn throttle(kv: &dyn KvStore, queue: QueueName, max_jobs: u32, window_secs: u64) {
    let key = keys::rate_limit(queue.as_str(), "jobs");
    let window = Duration::from_secs(window_secs);
    loop {
        let count = kv.incr(&key, window);
        if count <= max_jobs as i64 {
            return;
        }
        tokio::time::sleep(window).await;
    }
}

pub mod config;
pub mod db;
pub mod error;
pub mod eval;
pub mod handlers;
pub mod inbox;
pub mod kv;
pub mod links;
pub mod queue;
pub mod ranking;
pub mod secrets;
pub mod youtube;

pub use config::{load_config, Config};
pub use db::Database;
pub use error::{ConfigError, Result, TubesiftError};
pub use eval::{evaluate, EvalParams, EvalReport};
pub use kv::{KvStore, MemoryKv};
pub use queue::{JobHandler, JobOutcome, JobPayload, JobQueue, QueueName, WorkerPool};
pub use ranking::{Classification, Ranker};
pub use secrets::{secret_from_env, CredentialSealer, SecretError};
pub use youtube::{VideoMetadata, YouTubeClient};

//! Job handlers binding the pipeline stages: inbox sync fan-out, email
//! processing, metadata enrichment, and rank computation.
//!
//! Handlers are idempotent by construction — at-least-once delivery plus
//! the uniqueness constraints in the store make redelivery a no-op — and
//! never hold a database transaction across an external call.

pub mod email_process;
pub mod enrich;
pub mod inbox_sync;
pub mod rank;

pub use email_process::EmailProcessHandler;
pub use enrich::EnrichHandler;
pub use inbox_sync::InboxSyncHandler;
pub use rank::RankComputeHandler;

//! Join-request reconciliation engine
//!
//! A recurring job that inspects the append-only log of chat-join activity
//! and, based on how long each request has been sitting, reminds, bans or
//! denies-and-forgets the user, then writes the consequences back to the log.

mod classify;
mod error;
mod execute;
mod policy;
mod record;
mod service;
mod store;
mod update;

pub use classify::{Classification, NOTIFY_AFTER_SECS, RESOLVE_AFTER_SECS, classify};
pub use error::{ReconcileError, ReconcileResult};
pub use execute::{
    ActionExecutor, BanOutcome, BanReport, DEFAULT_MAX_IN_FLIGHT, ExecutionReport,
};
pub use policy::{ChatPolicy, MemoryPolicyStore, PolicyStore};
pub use record::{Candidate, ChatId, EventRecord, Operation, RunSummary, UserChat, UserId};
pub use service::{ReconcileConfig, ReconcileService, RunOutcome, Trigger};
pub use store::{EventStore, MemoryEventStore};
pub use update::{RETENTION_DAYS, StateUpdater};

/// Request type for the reconciliation task
#[derive(Debug, Clone)]
pub enum ReconcileRequest {
    /// Run a reconciliation pass immediately
    RunNow,
    /// Shut down the reconciliation task
    Shutdown,
}

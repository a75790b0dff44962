//! State write-back
//!
//! Applies the consequences of a completed run to the event store: resolved
//! pairs are deleted, delivered reminders are marked, confirmed bans get a
//! durable marker, and the retention sweep clears out stale history.

use crate::RECONCILE_TARGET;
use crate::reconcile::{
    Classification, EventRecord, EventStore, ExecutionReport, ReconcileResult, RunSummary,
    UserChat,
};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::debug;

/// Days an ordinary record survives before the retention sweep removes it
pub const RETENTION_DAYS: i64 = 30;

/// Writes run consequences back to the event store
pub struct StateUpdater {
    store: Arc<dyn EventStore>,
}

impl StateUpdater {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }

    /// Persist the outcome of the action batches. Returns the number of
    /// records removed for denied users.
    pub async fn apply(
        &self,
        classification: &Classification,
        report: &ExecutionReport,
    ) -> ReconcileResult<u64> {
        let denied: Vec<UserChat> = classification.to_deny.iter().map(|c| c.user).collect();
        let removed = if denied.is_empty() {
            0
        } else {
            self.store.delete_for_users(&denied).await?
        };

        for candidate in &report.notified {
            self.store.mark_notified(candidate.user).await?;
        }

        for candidate in report.banned() {
            self.store
                .insert(EventRecord::banned_marker(candidate.user, candidate.username))
                .await?;
        }

        debug!(
            target: RECONCILE_TARGET,
            removed,
            marked = report.notified.len(),
            "state write-back applied"
        );
        Ok(removed)
    }

    /// Retention sweep, independent of the main sequence
    pub async fn prune(&self, now: DateTime<Utc>) -> ReconcileResult<u64> {
        self.store
            .prune_before(now - Duration::days(RETENTION_DAYS))
            .await
    }

    /// Write the audit entry summarizing one run
    pub async fn record_run(&self, summary: &RunSummary) -> ReconcileResult<()> {
        self.store.insert(EventRecord::service(summary.render())).await
    }
}

//! Event store
//!
//! The append-only log lives behind this trait; the engine only ever reads a
//! full snapshot and writes back targeted mutations. The bundled
//! implementation keeps records in memory; a database-backed store plugs in
//! behind the same seam.

use crate::reconcile::{EventRecord, Operation, ReconcileResult, UserChat};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;

/// Storage seam for the append-only event log
#[async_trait::async_trait]
pub trait EventStore: Send + Sync {
    /// Append a record
    async fn insert(&self, record: EventRecord) -> ReconcileResult<()>;

    /// Set `notified = true` on every pending join record for the pair.
    /// Returns whether any record was updated.
    async fn mark_notified(&self, user: UserChat) -> ReconcileResult<bool>;

    /// Remove every record belonging to the given pairs. Returns the number
    /// of records removed.
    async fn delete_for_users(&self, users: &[UserChat]) -> ReconcileResult<u64>;

    /// Remove records created before the cutoff. Audit entries are exempt
    /// regardless of age. Returns the number of records removed.
    async fn prune_before(&self, cutoff: DateTime<Utc>) -> ReconcileResult<u64>;

    /// Snapshot the full log
    async fn scan(&self) -> ReconcileResult<Vec<EventRecord>>;
}

/// In-memory event store
#[derive(Clone)]
pub struct MemoryEventStore {
    records: Arc<DashMap<String, EventRecord>>,
}

impl Default for MemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEventStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: Arc::new(DashMap::new()),
        }
    }

    /// Number of records currently held
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store holds no records
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait::async_trait]
impl EventStore for MemoryEventStore {
    async fn insert(&self, record: EventRecord) -> ReconcileResult<()> {
        self.records.insert(record.id.clone(), record);
        Ok(())
    }

    async fn mark_notified(&self, user: UserChat) -> ReconcileResult<bool> {
        let mut updated = false;
        for mut entry in self.records.iter_mut() {
            let record = entry.value_mut();
            if record.operation == Operation::WantsToJoin && record.user_chat() == Some(user) {
                record.notified = Some(true);
                updated = true;
            }
        }
        Ok(updated)
    }

    async fn delete_for_users(&self, users: &[UserChat]) -> ReconcileResult<u64> {
        let before = self.records.len();
        self.records.retain(|_, record| {
            record
                .user_chat()
                .is_none_or(|pair| !users.contains(&pair))
        });
        Ok((before - self.records.len()) as u64)
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> ReconcileResult<u64> {
        let before = self.records.len();
        self.records
            .retain(|_, record| record.is_audit() || record.at >= cutoff);
        Ok((before - self.records.len()) as u64)
    }

    async fn scan(&self) -> ReconcileResult<Vec<EventRecord>> {
        Ok(self.records.iter().map(|e| e.value().clone()).collect())
    }
}

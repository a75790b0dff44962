//! Reconciliation service
//!
//! Owns the run cadence, the single-flight reentrancy guard and top-level
//! error containment. One service runs per process; overlapping triggers are
//! dropped, never queued.

use crate::gateway::MessagingGateway;
use crate::reconcile::{
    ActionExecutor, DEFAULT_MAX_IN_FLIGHT, EventStore, PolicyStore, ReconcileRequest,
    ReconcileResult, RunSummary, StateUpdater, classify,
};
use crate::{ERROR_TARGET, RECONCILE_TARGET};
use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// What kind of invocation a run is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Timer-driven: initial delay, real side effects
    Timer,
    /// Manual inspection: no delay, no side effects, counts only
    Dry,
}

/// How a trigger ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The run went through; here is what it did (or would do, when dry)
    Completed(RunSummary),
    /// Another run was in flight; this trigger was dropped
    Skipped,
}

/// Tunables for the service
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// Time between timer-driven runs
    pub interval: Duration,
    /// Settle time before a timer-driven run starts working
    pub initial_delay: Duration,
    /// Cap on concurrent gateway calls
    pub max_in_flight: usize,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            initial_delay: Duration::from_secs(5),
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

/// Releases the reentrancy flag on every exit path
struct RunningGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// The reconciliation engine's top-level service
pub struct ReconcileService {
    store: Arc<dyn EventStore>,
    policies: Arc<dyn PolicyStore>,
    gateway: Arc<dyn MessagingGateway>,
    executor: ActionExecutor,
    updater: StateUpdater,
    config: ReconcileConfig,
    running: AtomicBool,
}

impl ReconcileService {
    /// Wire up a service over the three collaborators
    pub fn new(
        store: Arc<dyn EventStore>,
        policies: Arc<dyn PolicyStore>,
        gateway: Arc<dyn MessagingGateway>,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            executor: ActionExecutor::new(Arc::clone(&gateway), config.max_in_flight),
            updater: StateUpdater::new(Arc::clone(&store)),
            store,
            policies,
            gateway,
            config,
            running: AtomicBool::new(false),
        }
    }

    /// Perform one reconciliation pass.
    ///
    /// At most one run is active at a time; a trigger arriving while another
    /// run holds the flag returns `Skipped` without touching the store.
    pub async fn run(&self, trigger: Trigger) -> ReconcileResult<RunOutcome> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            info!(target: RECONCILE_TARGET, "run already in progress, dropping trigger");
            return Ok(RunOutcome::Skipped);
        }
        let _guard = RunningGuard {
            flag: &self.running,
        };

        if trigger == Trigger::Timer {
            tokio::time::sleep(self.config.initial_delay).await;
        }

        let started = Instant::now();
        let snapshot = self.store.scan().await?;
        let ban_chats = self.policies.chats_with_ban_policy().await?;
        let classification = classify(&snapshot, &ban_chats, Utc::now());

        if trigger == Trigger::Dry {
            return Ok(RunOutcome::Completed(RunSummary {
                dry: true,
                elapsed_ms: started.elapsed().as_millis() as u64,
                notified: classification.to_notify.len(),
                banned: classification.to_ban.len(),
                removed: classification.to_deny.len(),
                ..Default::default()
            }));
        }

        let report = self.executor.execute(&classification).await;
        self.updater.apply(&classification, &report).await?;

        // The retention sweep is independent of the main sequence; its
        // failure must not take the run's results down with it.
        let pruned = match self.updater.prune(Utc::now()).await {
            Ok(pruned) => pruned,
            Err(e) => {
                warn!(target: RECONCILE_TARGET, error = %e, "retention sweep failed");
                0
            }
        };

        let summary = RunSummary {
            dry: false,
            elapsed_ms: started.elapsed().as_millis() as u64,
            notified: report.notified.len(),
            banned: report.banned().len(),
            removed: classification.to_deny.len(),
            notify_failures: report.notify_failures,
            decline_failures: report.decline_failures,
            ban_hazards: report.hazards(),
            pruned,
        };
        self.updater.record_run(&summary).await?;

        if !summary.ban_hazards.is_empty() {
            let alert = format!(
                "Users were approved without the ban landing: {}",
                summary.ban_hazards.join("; ")
            );
            if let Err(e) = self.gateway.send_admin_alert(&alert).await {
                warn!(target: RECONCILE_TARGET, error = %e, "failed to deliver hazard alert");
            }
        }

        info!(
            target: RECONCILE_TARGET,
            notified = summary.notified,
            banned = summary.banned,
            removed = summary.removed,
            pruned = summary.pruned,
            elapsed_ms = summary.elapsed_ms,
            "reconciliation run completed"
        );
        Ok(RunOutcome::Completed(summary))
    }

    /// Run a side-effect-free pass and log any failure locally
    pub async fn dry_run(&self) -> ReconcileResult<RunOutcome> {
        let result = self.run(Trigger::Dry).await;
        if let Err(e) = &result {
            error!(target: ERROR_TARGET, error = %e, "dry reconciliation run failed");
        }
        result
    }

    /// Start the periodic task. Returns the request channel and the task
    /// handle; send `Shutdown` to drain.
    pub fn spawn(self: Arc<Self>) -> (Sender<ReconcileRequest>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel::<ReconcileRequest>(16);
        let handle = tokio::spawn(async move {
            self.run_loop(rx).await;
        });
        (tx, handle)
    }

    async fn run_loop(&self, mut rx: Receiver<ReconcileRequest>) {
        info!(
            target: RECONCILE_TARGET,
            interval_secs = self.config.interval.as_secs(),
            "starting reconciliation task"
        );

        let mut interval = tokio::time::interval(self.config.interval);

        loop {
            tokio::select! {
                Some(request) = rx.recv() => {
                    match request {
                        ReconcileRequest::RunNow => {
                            info!(target: RECONCILE_TARGET, "received request to run now");
                            self.run_contained(Trigger::Timer).await;
                        }
                        ReconcileRequest::Shutdown => {
                            info!(target: RECONCILE_TARGET, "received shutdown request");
                            break;
                        }
                    }
                }
                _ = interval.tick() => {
                    self.run_contained(Trigger::Timer).await;
                }
            }
        }

        info!(target: RECONCILE_TARGET, "reconciliation task shut down");
    }

    /// Top-level error containment: nothing escapes the task loop. Real
    /// invocations forward the failure to the administrator channel.
    async fn run_contained(&self, trigger: Trigger) {
        if let Err(e) = self.run(trigger).await {
            error!(target: ERROR_TARGET, error = %e, "reconciliation run failed");
            if trigger == Trigger::Timer {
                let alert = format!("Reconciliation run failed: {e}");
                if let Err(alert_err) = self.gateway.send_admin_alert(&alert).await {
                    error!(target: ERROR_TARGET, error = %alert_err, "failed to deliver failure alert");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MockMessagingGateway;
    use crate::reconcile::{
        ChatPolicy, EventRecord, MemoryEventStore, MemoryPolicyStore, Operation, ReconcileError,
        UserChat,
    };
    use chrono::Duration as ChronoDuration;

    fn join_request(user_id: i64, chat_id: i64, age_mins: i64, notified: Option<bool>) -> EventRecord {
        let mut record = EventRecord::user(Operation::WantsToJoin, chat_id, user_id, "someone");
        record.at = Utc::now() - ChronoDuration::minutes(age_mins);
        record.notified = notified;
        record
    }

    fn service_with(
        store: Arc<MemoryEventStore>,
        policies: Arc<MemoryPolicyStore>,
        gateway: MockMessagingGateway,
    ) -> ReconcileService {
        let config = ReconcileConfig {
            initial_delay: Duration::from_millis(1),
            ..Default::default()
        };
        ReconcileService::new(store, policies, Arc::new(gateway), config)
    }

    #[tokio::test]
    async fn test_overlapping_trigger_is_dropped_without_touching_the_store() {
        let store = Arc::new(MemoryEventStore::new());
        store
            .insert(join_request(1, -100, 30, None))
            .await
            .unwrap();

        let service = service_with(
            store.clone(),
            Arc::new(MemoryPolicyStore::new()),
            MockMessagingGateway::new(),
        );
        service.running.store(true, Ordering::SeqCst);

        let outcome = service.run(Trigger::Timer).await.unwrap();
        assert_eq!(outcome, RunOutcome::Skipped);
        assert_eq!(store.len(), 1);
        // The losing trigger must not release the owner's flag either.
        assert!(service.running.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_dry_run_counts_without_side_effects() {
        let store = Arc::new(MemoryEventStore::new());
        store
            .insert(join_request(1, -100, 30, None))
            .await
            .unwrap();
        store
            .insert(join_request(2, -100, 7 * 60, Some(true)))
            .await
            .unwrap();

        // No expectations: any gateway call would fail the test.
        let service = service_with(
            store.clone(),
            Arc::new(MemoryPolicyStore::new()),
            MockMessagingGateway::new(),
        );

        let outcome = service.dry_run().await.unwrap();
        let RunOutcome::Completed(summary) = outcome else {
            panic!("expected a completed dry run");
        };
        assert!(summary.dry);
        assert_eq!(summary.notified, 1);
        assert_eq!(summary.removed, 1);
        assert_eq!(summary.banned, 0);

        // Snapshot untouched: nothing marked, nothing deleted, no audit entry.
        let snapshot = store.scan().await.unwrap();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.iter().all(|r| !r.is_audit()));
        assert!(!service.running.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_run_executes_and_writes_back() {
        let store = Arc::new(MemoryEventStore::new());
        store
            .insert(join_request(1, -100, 30, None))
            .await
            .unwrap();
        store
            .insert(join_request(2, -100, 7 * 60, Some(true)))
            .await
            .unwrap();
        store
            .insert(join_request(3, -200, 7 * 60, Some(true)))
            .await
            .unwrap();

        let policies = Arc::new(MemoryPolicyStore::new());
        policies.upsert(ChatPolicy {
            chat_id: -200,
            ban_not_joining: true,
        });

        let mut gateway = MockMessagingGateway::new();
        gateway
            .expect_send_message()
            .times(1)
            .returning(|_, _| Ok(()));
        gateway
            .expect_decline_join_request()
            .times(1)
            .returning(|_, _| Ok(true));
        gateway
            .expect_approve_join_request()
            .times(1)
            .returning(|_, _| Ok(true));
        gateway
            .expect_ban_member()
            .times(1)
            .returning(|_, _| Ok(true));

        let service = service_with(store.clone(), policies, gateway);
        let outcome = service.run(Trigger::Timer).await.unwrap();

        let RunOutcome::Completed(summary) = outcome else {
            panic!("expected a completed run");
        };
        assert_eq!(summary.notified, 1);
        assert_eq!(summary.removed, 1);
        assert_eq!(summary.banned, 1);
        assert!(summary.ban_hazards.is_empty());

        let snapshot = store.scan().await.unwrap();
        // Denied pair gone, reminder marked, ban marker and audit entry added.
        assert!(snapshot.iter().all(|r| r.user_id != Some(2)));
        assert!(
            snapshot
                .iter()
                .any(|r| r.user_id == Some(1) && r.notified == Some(true))
        );
        assert!(
            snapshot
                .iter()
                .any(|r| r.operation == Operation::IsBanned
                    && r.user_chat() == Some(UserChat::new(3, -200)))
        );
        assert!(snapshot.iter().any(|r| r.is_audit()));
        assert!(!service.running.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hazard_triggers_an_admin_alert() {
        let store = Arc::new(MemoryEventStore::new());
        store
            .insert(join_request(3, -200, 7 * 60, Some(true)))
            .await
            .unwrap();

        let policies = Arc::new(MemoryPolicyStore::new());
        policies.upsert(ChatPolicy {
            chat_id: -200,
            ban_not_joining: true,
        });

        let mut gateway = MockMessagingGateway::new();
        gateway
            .expect_approve_join_request()
            .returning(|_, _| Ok(true));
        gateway.expect_ban_member().returning(|_, _| {
            Err(crate::gateway::GatewayError::Api {
                method: "banChatMember",
                description: "not enough rights".to_string(),
            })
        });
        gateway
            .expect_send_admin_alert()
            .times(1)
            .withf(|text| text.contains("approved but ban failed"))
            .returning(|_| Ok(()));

        let service = service_with(store.clone(), policies, gateway);
        let outcome = service.run(Trigger::Timer).await.unwrap();

        let RunOutcome::Completed(summary) = outcome else {
            panic!("expected a completed run");
        };
        assert_eq!(summary.banned, 0);
        assert_eq!(summary.ban_hazards.len(), 1);

        // The hazard must not leave a durable ban marker behind.
        let snapshot = store.scan().await.unwrap();
        assert!(snapshot.iter().all(|r| r.operation != Operation::IsBanned));
    }

    #[tokio::test(start_paused = true)]
    async fn test_flag_is_released_when_the_run_errors() {
        struct FailingStore;

        #[async_trait::async_trait]
        impl EventStore for FailingStore {
            async fn insert(&self, _: EventRecord) -> ReconcileResult<()> {
                Err(ReconcileError::Store("down".to_string()))
            }
            async fn mark_notified(&self, _: UserChat) -> ReconcileResult<bool> {
                Err(ReconcileError::Store("down".to_string()))
            }
            async fn delete_for_users(&self, _: &[UserChat]) -> ReconcileResult<u64> {
                Err(ReconcileError::Store("down".to_string()))
            }
            async fn prune_before(
                &self,
                _: chrono::DateTime<Utc>,
            ) -> ReconcileResult<u64> {
                Err(ReconcileError::Store("down".to_string()))
            }
            async fn scan(&self) -> ReconcileResult<Vec<EventRecord>> {
                Err(ReconcileError::Store("down".to_string()))
            }
        }

        let service = ReconcileService::new(
            Arc::new(FailingStore),
            Arc::new(MemoryPolicyStore::new()),
            Arc::new(MockMessagingGateway::new()),
            ReconcileConfig {
                initial_delay: Duration::from_millis(1),
                ..Default::default()
            },
        );

        assert!(service.run(Trigger::Timer).await.is_err());
        assert!(!service.running.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_contained_failure_alerts_the_administrator() {
        let mut gateway = MockMessagingGateway::new();
        gateway
            .expect_send_admin_alert()
            .times(1)
            .withf(|text| text.contains("Reconciliation run failed"))
            .returning(|_| Ok(()));

        struct FailingPolicies;

        #[async_trait::async_trait]
        impl PolicyStore for FailingPolicies {
            async fn chats_with_ban_policy(
                &self,
            ) -> ReconcileResult<std::collections::HashSet<i64>> {
                Err(ReconcileError::Policy("down".to_string()))
            }
        }

        let service = ReconcileService::new(
            Arc::new(MemoryEventStore::new()),
            Arc::new(FailingPolicies),
            Arc::new(gateway),
            ReconcileConfig {
                initial_delay: Duration::from_millis(1),
                ..Default::default()
            },
        );

        // Must not panic or propagate; the alert expectation is the check.
        service.run_contained(Trigger::Timer).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drains_the_task() {
        let service = Arc::new(service_with(
            Arc::new(MemoryEventStore::new()),
            Arc::new(MemoryPolicyStore::new()),
            MockMessagingGateway::new(),
        ));

        let (tx, handle) = service.spawn();
        tx.send(ReconcileRequest::Shutdown).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("task did not shut down")
            .expect("task panicked");
    }
}

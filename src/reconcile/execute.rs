//! Action execution
//!
//! Performs the three classified action sets against the messaging gateway.
//! Each set fans out concurrently with per-item failure isolation: a failing
//! call is recorded in the report and never aborts the batch. Fan-out is
//! bounded by a semaphore so a large backlog cannot flood the platform.

use crate::gateway::MessagingGateway;
use crate::reconcile::{Candidate, ChatId, Classification};
use crate::{ERROR_TARGET, RECONCILE_TARGET};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Default cap on in-flight gateway calls per run
pub const DEFAULT_MAX_IN_FLIGHT: usize = 16;

fn reminder_text(chat_id: ChatId) -> String {
    format!(
        "You asked to join chat {chat_id} but never finished verifying. \
         Please complete verification soon, or your request will be withdrawn."
    )
}

/// Outcome of one ban attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BanOutcome {
    /// Approve and ban both landed
    Banned,
    /// The user was let into the chat but the ban failed. A safety hazard
    /// that must reach an administrator.
    ApprovedNotBanned(String),
    /// The approve step itself failed; nothing happened, retried next cycle
    ApproveFailed(String),
}

/// One ban attempt and how it went
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BanReport {
    pub candidate: Candidate,
    pub outcome: BanOutcome,
}

/// Aggregated per-item results of one execution pass
#[derive(Debug, Clone, Default)]
pub struct ExecutionReport {
    /// Users whose reminder was delivered; only these get marked notified
    pub notified: Vec<Candidate>,
    /// Reminder sends that failed
    pub notify_failures: usize,
    /// Join requests successfully declined
    pub declined: usize,
    /// Declines that failed; indistinguishable from already-withdrawn
    pub decline_failures: usize,
    /// Every ban attempt with its outcome
    pub bans: Vec<BanReport>,
}

impl ExecutionReport {
    /// Users whose ban fully landed
    #[must_use]
    pub fn banned(&self) -> Vec<Candidate> {
        self.bans
            .iter()
            .filter(|b| b.outcome == BanOutcome::Banned)
            .map(|b| b.candidate.clone())
            .collect()
    }

    /// Rendered descriptions of approved-but-not-banned hazards
    #[must_use]
    pub fn hazards(&self) -> Vec<String> {
        self.bans
            .iter()
            .filter_map(|b| match &b.outcome {
                BanOutcome::ApprovedNotBanned(reason) => Some(format!(
                    "{}: approved but ban failed: {reason}",
                    b.candidate
                )),
                _ => None,
            })
            .collect()
    }
}

/// Executes classified actions against the gateway
pub struct ActionExecutor {
    gateway: Arc<dyn MessagingGateway>,
    permits: Arc<Semaphore>,
}

impl ActionExecutor {
    /// Create an executor with the given fan-out bound
    pub fn new(gateway: Arc<dyn MessagingGateway>, max_in_flight: usize) -> Self {
        Self {
            gateway,
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
        }
    }

    /// Perform all three action sets. Never fails; everything lands in the
    /// report.
    pub async fn execute(&self, classification: &Classification) -> ExecutionReport {
        let mut report = ExecutionReport::default();

        let (declined, decline_failures) = self.decline_all(&classification.to_deny).await;
        report.declined = declined;
        report.decline_failures = decline_failures;

        let (notified, notify_failures) = self.notify_all(&classification.to_notify).await;
        report.notified = notified;
        report.notify_failures = notify_failures;

        report.bans = self.ban_all(&classification.to_ban).await;

        report
    }

    async fn decline_all(&self, candidates: &[Candidate]) -> (usize, usize) {
        let mut set = JoinSet::new();
        for candidate in candidates.iter().cloned() {
            let gateway = Arc::clone(&self.gateway);
            let permits = Arc::clone(&self.permits);
            set.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return false;
                };
                match gateway
                    .decline_join_request(candidate.user.chat_id, candidate.user.user_id)
                    .await
                {
                    Ok(true) => true,
                    Ok(false) => {
                        info!(target: RECONCILE_TARGET, %candidate, "decline refused, possibly already withdrawn");
                        false
                    }
                    Err(e) => {
                        info!(target: RECONCILE_TARGET, %candidate, error = %e, "decline failed, possibly already withdrawn");
                        false
                    }
                }
            });
        }

        let mut declined = 0;
        let mut failures = 0;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(true) => declined += 1,
                Ok(false) => failures += 1,
                Err(e) => {
                    failures += 1;
                    error!(target: ERROR_TARGET, error = %e, "decline task panicked");
                }
            }
        }
        (declined, failures)
    }

    async fn notify_all(&self, candidates: &[Candidate]) -> (Vec<Candidate>, usize) {
        let mut set = JoinSet::new();
        for candidate in candidates.iter().cloned() {
            let gateway = Arc::clone(&self.gateway);
            let permits = Arc::clone(&self.permits);
            set.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return None;
                };
                let text = reminder_text(candidate.user.chat_id);
                match gateway.send_message(candidate.user.user_id, &text).await {
                    Ok(()) => Some(candidate),
                    Err(e) => {
                        warn!(target: RECONCILE_TARGET, %candidate, error = %e, "reminder send failed, will retry next cycle");
                        None
                    }
                }
            });
        }

        let mut notified = Vec::new();
        let mut failures = 0;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Some(candidate)) => notified.push(candidate),
                Ok(None) => failures += 1,
                Err(e) => {
                    failures += 1;
                    error!(target: ERROR_TARGET, error = %e, "reminder task panicked");
                }
            }
        }
        (notified, failures)
    }

    async fn ban_all(&self, candidates: &[Candidate]) -> Vec<BanReport> {
        let mut set = JoinSet::new();
        for candidate in candidates.iter().cloned() {
            let gateway = Arc::clone(&self.gateway);
            let permits = Arc::clone(&self.permits);
            set.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return BanReport {
                        candidate,
                        outcome: BanOutcome::ApproveFailed("executor shutting down".to_string()),
                    };
                };
                let outcome = ban_sequence(gateway.as_ref(), &candidate).await;
                BanReport { candidate, outcome }
            });
        }

        let mut reports = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(report) => {
                    match &report.outcome {
                        BanOutcome::Banned => {
                            info!(target: RECONCILE_TARGET, candidate = %report.candidate, "ban landed");
                        }
                        BanOutcome::ApprovedNotBanned(reason) => {
                            error!(target: ERROR_TARGET, candidate = %report.candidate, reason, "user approved but ban failed");
                        }
                        BanOutcome::ApproveFailed(reason) => {
                            warn!(target: RECONCILE_TARGET, candidate = %report.candidate, reason, "approve failed, ban postponed");
                        }
                    }
                    reports.push(report);
                }
                Err(e) => {
                    error!(target: ERROR_TARGET, error = %e, "ban task panicked");
                }
            }
        }
        reports
    }
}

/// The strictly-ordered approve-then-ban sequence for one candidate
async fn ban_sequence(gateway: &dyn MessagingGateway, candidate: &Candidate) -> BanOutcome {
    let chat_id = candidate.user.chat_id;
    let user_id = candidate.user.user_id;

    match gateway.approve_join_request(chat_id, user_id).await {
        Ok(true) => {}
        Ok(false) => return BanOutcome::ApproveFailed("approve refused".to_string()),
        Err(e) => return BanOutcome::ApproveFailed(e.to_string()),
    }

    match gateway.ban_member(chat_id, user_id).await {
        Ok(true) => BanOutcome::Banned,
        Ok(false) => BanOutcome::ApprovedNotBanned("ban refused".to_string()),
        Err(e) => BanOutcome::ApprovedNotBanned(e.to_string()),
    }
}

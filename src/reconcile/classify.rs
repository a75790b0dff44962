//! Snapshot classification
//!
//! Pure decision logic: given a snapshot of the event log, the set of chats
//! with the ban policy, and the current time, split overdue join requests
//! into the three action sets. No I/O happens here, which keeps every rule
//! testable against a frozen snapshot.

use crate::reconcile::{Candidate, ChatId, EventRecord, Operation, UserChat};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;

/// How long an unnotified join request may sit before a reminder is due
pub const NOTIFY_AFTER_SECS: i64 = 20 * 60;
/// How long a notified join request may sit before the chat's verdict is due
pub const RESOLVE_AFTER_SECS: i64 = 6 * 60 * 60;

/// The three disjoint action sets derived from one snapshot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Classification {
    /// Unnotified pending users due for a reminder
    pub to_notify: Vec<Candidate>,
    /// Notified pending users overdue in a chat that bans
    pub to_ban: Vec<Candidate>,
    /// Notified pending users overdue everywhere else
    pub to_deny: Vec<Candidate>,
    /// Pairs already carrying a durable ban marker
    pub banned: HashSet<UserChat>,
}

impl Classification {
    /// Whether the snapshot produced no work
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_notify.is_empty() && self.to_ban.is_empty() && self.to_deny.is_empty()
    }
}

/// Classify a log snapshot against the current time.
///
/// Ban markers are collected in a first pass so the verdict branch sees the
/// same dedupe set regardless of record order, and verdicts are classified
/// before reminders so the output sets stay disjoint per pair even when a
/// pair holds join records in both notified states. A pair that already
/// carries a ban marker is still reminder-eligible while its join record is
/// unnotified; that asymmetry is inherited behavior, kept on purpose.
#[must_use]
pub fn classify(
    records: &[EventRecord],
    ban_chats: &HashSet<ChatId>,
    now: DateTime<Utc>,
) -> Classification {
    let mut out = Classification::default();

    for record in records {
        if record.operation == Operation::IsBanned {
            if let Some(pair) = record.user_chat() {
                out.banned.insert(pair);
            }
        }
    }

    // Verdict branch first: a pair that is already due for resolution no
    // longer gets a reminder, even if another of its records is unnotified.
    let mut resolved = HashSet::new();
    for record in records {
        let Some((pair, age)) = pending_join(record, now) else {
            continue;
        };
        if record.notified.is_some()
            && age >= Duration::seconds(RESOLVE_AFTER_SECS)
            && resolved.insert(pair)
        {
            let candidate = Candidate::new(pair, record.username.clone().unwrap_or_default());
            if ban_chats.contains(&pair.chat_id) && !out.banned.contains(&pair) {
                out.to_ban.push(candidate);
            } else {
                out.to_deny.push(candidate);
            }
        }
    }

    let mut seen_notify = HashSet::new();
    for record in records {
        let Some((pair, age)) = pending_join(record, now) else {
            continue;
        };
        if record.notified.is_none()
            && age >= Duration::seconds(NOTIFY_AFTER_SECS)
            && !resolved.contains(&pair)
            && seen_notify.insert(pair)
        {
            out.to_notify
                .push(Candidate::new(pair, record.username.clone().unwrap_or_default()));
        }
    }

    out
}

fn pending_join(record: &EventRecord, now: DateTime<Utc>) -> Option<(UserChat, Duration)> {
    if record.operation != Operation::WantsToJoin {
        return None;
    }
    record.user_chat().map(|pair| (pair, now - record.at))
}

//! Event log records
//!
//! This module defines the append-only log records the reconciliation engine
//! consumes and produces, plus the per-run summary written back as an audit
//! entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Telegram chat identifier
pub type ChatId = i64;
/// Telegram user identifier
pub type UserId = i64;

/// Kind of activity a log record describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// A user asked to join a chat
    WantsToJoin,
    /// A user completed verification
    HasVerified,
    /// A user replied to the bot in private
    ReplyingToBot,
    /// Records were removed for a user
    Deletion,
    /// Engine-internal audit entry, exempt from pruning
    BackgroundTask,
    /// Durable marker that a user was banned from a chat
    IsBanned,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WantsToJoin => write!(f, "wants_to_join"),
            Self::HasVerified => write!(f, "has_verified"),
            Self::ReplyingToBot => write!(f, "replying_to_bot"),
            Self::Deletion => write!(f, "deletion"),
            Self::BackgroundTask => write!(f, "background_task"),
            Self::IsBanned => write!(f, "is_banned"),
        }
    }
}

/// Composite identity of a user's relationship to one chat
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct UserChat {
    pub user_id: UserId,
    pub chat_id: ChatId,
}

impl UserChat {
    #[must_use]
    pub fn new(user_id: UserId, chat_id: ChatId) -> Self {
        Self { user_id, chat_id }
    }
}

impl fmt::Display for UserChat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "user_id: {}, chat_id: {}", self.user_id, self.chat_id)
    }
}

/// One append-only log entry
///
/// User activity records carry an identity; audit entries produced by the
/// engine itself carry only a message. The current state of a user-chat pair
/// is never stored directly, it is derived by scanning all matching records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Unique ID of this record
    pub id: String,
    /// What happened
    pub operation: Operation,
    /// User the record is about, absent on audit entries
    pub user_id: Option<UserId>,
    /// Chat the record is about, absent on audit entries
    pub chat_id: Option<ChatId>,
    /// Display name, for reporting only
    pub username: Option<String>,
    /// When the record was created
    pub at: DateTime<Utc>,
    /// Present once a reminder has been sent for this record
    pub notified: Option<bool>,
    /// Free text, used by audit entries
    pub message: Option<String>,
}

impl EventRecord {
    /// Create a record describing user activity
    pub fn user(
        operation: Operation,
        chat_id: ChatId,
        user_id: UserId,
        username: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            operation,
            user_id: Some(user_id),
            chat_id: Some(chat_id),
            username: Some(username.into()),
            at: Utc::now(),
            notified: None,
            message: None,
        }
    }

    /// Create an engine-internal audit entry
    pub fn service(message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            operation: Operation::BackgroundTask,
            user_id: None,
            chat_id: None,
            username: None,
            at: Utc::now(),
            notified: None,
            message: Some(message.into()),
        }
    }

    /// Create the durable marker persisted after a confirmed ban
    pub fn banned_marker(user: UserChat, username: impl Into<String>) -> Self {
        Self::user(Operation::IsBanned, user.chat_id, user.user_id, username)
    }

    /// The user-chat pair this record belongs to, if it has one
    #[must_use]
    pub fn user_chat(&self) -> Option<UserChat> {
        match (self.user_id, self.chat_id) {
            (Some(user_id), Some(chat_id)) => Some(UserChat::new(user_id, chat_id)),
            _ => None,
        }
    }

    /// Whether this record is an audit entry
    #[must_use]
    pub fn is_audit(&self) -> bool {
        self.operation == Operation::BackgroundTask
    }
}

/// A user selected for an action by classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub user: UserChat,
    pub username: String,
}

impl Candidate {
    #[must_use]
    pub fn new(user: UserChat, username: impl Into<String>) -> Self {
        Self {
            user,
            username: username.into(),
        }
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.username.is_empty() {
            write!(f, "{}", self.user)
        } else {
            write!(f, "{} ({})", self.user, self.username)
        }
    }
}

/// Summary of one reconciliation run, rendered into the audit entry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// True when the run classified only, without side effects
    pub dry: bool,
    /// Wall-clock time the run took
    pub elapsed_ms: u64,
    /// Users a reminder was sent to (or would be, on a dry run)
    pub notified: usize,
    /// Users banned (or due for banning, on a dry run)
    pub banned: usize,
    /// Users whose join request was withdrawn and records removed
    pub removed: usize,
    /// Reminder sends that failed and will be retried next cycle
    pub notify_failures: usize,
    /// Declines that failed, acceptable either way
    pub decline_failures: usize,
    /// Users approved into a chat without the ban landing
    pub ban_hazards: Vec<String>,
    /// Records removed by the retention sweep
    pub pruned: u64,
}

impl RunSummary {
    /// Render the free-text body of the audit entry
    #[must_use]
    pub fn render(&self) -> String {
        let mut text = format!(
            "{} finished in {}ms: notified {}, banned {}, removed {}, pruned {}",
            if self.dry {
                "dry reconciliation"
            } else {
                "reconciliation"
            },
            self.elapsed_ms,
            self.notified,
            self.banned,
            self.removed,
            self.pruned,
        );
        if self.notify_failures > 0 || self.decline_failures > 0 {
            text.push_str(&format!(
                "; {} reminders and {} declines failed",
                self.notify_failures, self.decline_failures
            ));
        }
        if !self.ban_hazards.is_empty() {
            text.push_str(&format!("; ban failures: {}", self.ban_hazards.join("; ")));
        }
        text
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

//! Per-chat policy store
//!
//! The engine consumes exactly one fact per chat: whether overdue unverified
//! users get banned instead of merely declined. Everything else about chat
//! settings belongs to the surrounding bot.

use crate::reconcile::{ChatId, ReconcileResult};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// Moderation policy of one chat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatPolicy {
    pub chat_id: ChatId,
    /// Ban users who never complete the join flow, instead of declining them
    pub ban_not_joining: bool,
}

/// Read seam over per-chat settings
#[async_trait::async_trait]
pub trait PolicyStore: Send + Sync {
    /// Chats whose policy bans users that fail to complete the join flow
    async fn chats_with_ban_policy(&self) -> ReconcileResult<HashSet<ChatId>>;
}

/// In-memory policy store
#[derive(Clone)]
pub struct MemoryPolicyStore {
    chats: Arc<DashMap<ChatId, ChatPolicy>>,
}

impl Default for MemoryPolicyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPolicyStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self {
            chats: Arc::new(DashMap::new()),
        }
    }

    /// Insert or replace a chat's policy
    pub fn upsert(&self, policy: ChatPolicy) {
        self.chats.insert(policy.chat_id, policy);
    }
}

#[async_trait::async_trait]
impl PolicyStore for MemoryPolicyStore {
    async fn chats_with_ban_policy(&self) -> ReconcileResult<HashSet<ChatId>> {
        Ok(self
            .chats
            .iter()
            .filter(|entry| entry.value().ban_not_joining)
            .map(|entry| *entry.key())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_only_ban_policy_chats_are_listed() {
        let store = MemoryPolicyStore::new();
        store.upsert(ChatPolicy {
            chat_id: -100,
            ban_not_joining: true,
        });
        store.upsert(ChatPolicy {
            chat_id: -200,
            ban_not_joining: false,
        });

        let chats = store.chats_with_ban_policy().await.unwrap();
        assert_eq!(chats, HashSet::from([-100]));
    }

    #[tokio::test]
    async fn test_upsert_replaces_policy() {
        let store = MemoryPolicyStore::new();
        store.upsert(ChatPolicy {
            chat_id: -100,
            ban_not_joining: true,
        });
        store.upsert(ChatPolicy {
            chat_id: -100,
            ban_not_joining: false,
        });

        assert!(store.chats_with_ban_policy().await.unwrap().is_empty());
    }
}

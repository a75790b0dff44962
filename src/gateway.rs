//! Messaging gateway
//!
//! This module defines the engine's seam to the messaging platform and the
//! Telegram Bot API implementation behind it. All user-facing side effects
//! (reminders, join-request verdicts, bans, admin alerts) go through here.

use crate::GATEWAY_TARGET;
use crate::reconcile::{ChatId, UserId};
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, warn};

/// Default Telegram Bot API host
pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

const HTTP_TIMEOUT_SECS: u64 = 10;

/// Errors from the messaging platform
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Transport-level failure
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The platform answered but rejected the call
    #[error("telegram api rejected {method}: {description}")]
    Api {
        method: &'static str,
        description: String,
    },
}

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Side-effect surface of the messaging platform
///
/// The boolean-returning calls mirror the platform's own verdict responses;
/// `false` means the platform refused without an error envelope.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait MessagingGateway: Send + Sync {
    /// Send a private message to a user
    async fn send_message(&self, user_id: UserId, text: &str) -> GatewayResult<()>;

    /// Approve a pending join request
    async fn approve_join_request(&self, chat_id: ChatId, user_id: UserId) -> GatewayResult<bool>;

    /// Decline a pending join request
    async fn decline_join_request(&self, chat_id: ChatId, user_id: UserId) -> GatewayResult<bool>;

    /// Ban a member from a chat
    async fn ban_member(&self, chat_id: ChatId, user_id: UserId) -> GatewayResult<bool>;

    /// Deliver an operational alert to the administrator channel
    async fn send_admin_alert(&self, text: &str) -> GatewayResult<()>;
}

/// Standard Bot API response envelope
#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    ok: bool,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    description: Option<String>,
}

/// Telegram Bot API client
pub struct TelegramGateway {
    http: reqwest::Client,
    base_url: String,
    token: String,
    admin_chat_id: Option<ChatId>,
}

impl TelegramGateway {
    /// Create a gateway against the public Bot API host
    pub fn new(token: impl Into<String>, admin_chat_id: Option<ChatId>) -> GatewayResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            http,
            base_url: TELEGRAM_API_BASE.to_string(),
            token: token.into(),
            admin_chat_id,
        })
    }

    /// Point the gateway at a different API host
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn call(&self, method: &'static str, body: Value) -> GatewayResult<ApiEnvelope> {
        let endpoint = format!(
            "{}/bot{}/{method}",
            self.base_url.trim_end_matches('/'),
            self.token
        );
        let envelope: ApiEnvelope = self
            .http
            .post(&endpoint)
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        if envelope.ok {
            debug!(target: GATEWAY_TARGET, method, "api call succeeded");
            Ok(envelope)
        } else {
            Err(GatewayError::Api {
                method,
                description: envelope
                    .description
                    .unwrap_or_else(|| "no description".to_string()),
            })
        }
    }

    fn result_as_bool(envelope: &ApiEnvelope) -> bool {
        envelope
            .result
            .as_ref()
            .and_then(Value::as_bool)
            .unwrap_or(true)
    }
}

#[async_trait::async_trait]
impl MessagingGateway for TelegramGateway {
    async fn send_message(&self, user_id: UserId, text: &str) -> GatewayResult<()> {
        self.call("sendMessage", json!({ "chat_id": user_id, "text": text }))
            .await?;
        Ok(())
    }

    async fn approve_join_request(&self, chat_id: ChatId, user_id: UserId) -> GatewayResult<bool> {
        let envelope = self
            .call(
                "approveChatJoinRequest",
                json!({ "chat_id": chat_id, "user_id": user_id }),
            )
            .await?;
        Ok(Self::result_as_bool(&envelope))
    }

    async fn decline_join_request(&self, chat_id: ChatId, user_id: UserId) -> GatewayResult<bool> {
        let envelope = self
            .call(
                "declineChatJoinRequest",
                json!({ "chat_id": chat_id, "user_id": user_id }),
            )
            .await?;
        Ok(Self::result_as_bool(&envelope))
    }

    async fn ban_member(&self, chat_id: ChatId, user_id: UserId) -> GatewayResult<bool> {
        let envelope = self
            .call(
                "banChatMember",
                json!({ "chat_id": chat_id, "user_id": user_id }),
            )
            .await?;
        Ok(Self::result_as_bool(&envelope))
    }

    async fn send_admin_alert(&self, text: &str) -> GatewayResult<()> {
        match self.admin_chat_id {
            Some(chat_id) => {
                self.call("sendMessage", json!({ "chat_id": chat_id, "text": text }))
                    .await?;
                Ok(())
            }
            None => {
                warn!(target: GATEWAY_TARGET, alert = %text, "no admin chat configured, dropping alert");
                Ok(())
            }
        }
    }
}

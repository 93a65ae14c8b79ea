use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Public details of a chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatInfo {
    /// Chat id.
    pub id: i64,
    /// Display title; private chats have none.
    pub title: Option<String>,
}

/// Failures of platform calls.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// The platform rejected the call (permission, not found, rate limit).
    #[error("platform rejected {method}: {description} (code {code})")]
    Api {
        /// API method.
        method: &'static str,
        /// Platform error code.
        code: i64,
        /// Platform message.
        description: String,
    },
    /// The chat is unknown or not accessible to the bot.
    #[error("chat {chat_id} lookup failed: {reason}")]
    ChatLookup {
        /// Chat id that was looked up.
        chat_id: i64,
        /// Why the lookup failed.
        reason: String,
    },
    /// The request never got an answer from the platform.
    #[error("transport error calling {method}: {reason}")]
    Transport {
        /// API method.
        method: &'static str,
        /// Underlying error.
        reason: String,
    },
    /// The call exceeded its time budget.
    #[error("{method} timed out after {after:?}")]
    Timeout {
        /// API method.
        method: &'static str,
        /// Elapsed budget.
        after: Duration,
    },
    /// The platform answered with something that could not be decoded.
    #[error("could not decode {method} response: {reason}")]
    Decode {
        /// API method.
        method: &'static str,
        /// Decoder message.
        reason: String,
    },
}

/// Calls the moderation core issues against the messaging platform.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Looks up a chat, failing with [`PlatformError::ChatLookup`] when unknown.
    async fn get_chat(&self, chat_id: i64) -> Result<ChatInfo, PlatformError>;

    /// Deletes one message.
    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), PlatformError>;

    /// Bans `user_id` from `chat_id`, optionally revoking all their messages there.
    async fn ban_chat_member(
        &self,
        chat_id: i64,
        user_id: i64,
        revoke_messages: bool,
    ) -> Result<(), PlatformError>;

    /// Sends `text` to `chat_id` as a reply to `reply_to_message_id`.
    async fn send_reply(
        &self,
        chat_id: i64,
        reply_to_message_id: i64,
        text: &str,
    ) -> Result<(), PlatformError>;
}

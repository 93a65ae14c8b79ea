//! In-memory platform double that records every call.

use std::{
    collections::{HashMap, HashSet},
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::{sleep, Instant};

use crate::platform::{ChatInfo, ChatPlatform, PlatformError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformCall {
    GetChat {
        chat_id: i64,
    },
    Delete {
        chat_id: i64,
        message_id: i64,
        started_at: Instant,
    },
    Ban {
        chat_id: i64,
        user_id: i64,
        revoke_messages: bool,
    },
    Reply {
        chat_id: i64,
        reply_to_message_id: i64,
        text: String,
    },
}

#[derive(Debug, Default)]
pub struct RecordingPlatform {
    calls: Mutex<Vec<PlatformCall>>,
    delete_latency: Duration,
    failing_deletes: HashSet<(i64, i64)>,
    failing_bans: HashSet<i64>,
    titles: HashMap<i64, String>,
}

impl RecordingPlatform {
    pub fn with_delete_latency(mut self, latency: Duration) -> Self {
        self.delete_latency = latency;
        self
    }

    pub fn failing_delete(mut self, chat_id: i64, message_id: i64) -> Self {
        self.failing_deletes.insert((chat_id, message_id));
        self
    }

    pub fn failing_ban(mut self, chat_id: i64) -> Self {
        self.failing_bans.insert(chat_id);
        self
    }

    pub fn with_chat(mut self, chat_id: i64, title: &str) -> Self {
        self.titles.insert(chat_id, title.to_string());
        self
    }

    pub fn calls(&self) -> Vec<PlatformCall> {
        self.calls.lock().clone()
    }

    pub fn replies(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                PlatformCall::Reply { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    fn push(&self, call: PlatformCall) {
        self.calls.lock().push(call);
    }
}

fn rejected(method: &'static str, description: &str) -> PlatformError {
    PlatformError::Api {
        method,
        code: 400,
        description: description.to_string(),
    }
}

#[async_trait]
impl ChatPlatform for RecordingPlatform {
    async fn get_chat(&self, chat_id: i64) -> Result<ChatInfo, PlatformError> {
        self.push(PlatformCall::GetChat { chat_id });
        self.titles
            .get(&chat_id)
            .map(|title| ChatInfo {
                id: chat_id,
                title: Some(title.clone()),
            })
            .ok_or_else(|| PlatformError::ChatLookup {
                chat_id,
                reason: "chat not found".into(),
            })
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), PlatformError> {
        self.push(PlatformCall::Delete {
            chat_id,
            message_id,
            started_at: Instant::now(),
        });
        if !self.delete_latency.is_zero() {
            sleep(self.delete_latency).await;
        }
        if self.failing_deletes.contains(&(chat_id, message_id)) {
            return Err(rejected(
                "deleteMessage",
                "Bad Request: message to delete not found",
            ));
        }
        Ok(())
    }

    async fn ban_chat_member(
        &self,
        chat_id: i64,
        user_id: i64,
        revoke_messages: bool,
    ) -> Result<(), PlatformError> {
        self.push(PlatformCall::Ban {
            chat_id,
            user_id,
            revoke_messages,
        });
        if self.failing_bans.contains(&chat_id) {
            return Err(rejected("banChatMember", "Bad Request: not enough rights"));
        }
        Ok(())
    }

    async fn send_reply(
        &self,
        chat_id: i64,
        reply_to_message_id: i64,
        text: &str,
    ) -> Result<(), PlatformError> {
        self.push(PlatformCall::Reply {
            chat_id,
            reply_to_message_id,
            text: text.to_string(),
        });
        Ok(())
    }
}

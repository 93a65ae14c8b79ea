use std::{fmt, str::FromStr};

use thiserror::Error;

const NAMESPACE: &str = "message";

/// Location of a recorded message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageRef {
    /// Chat the message was posted in.
    pub group_id: i64,
    /// Message id within that chat.
    pub message_id: i64,
}

/// Store key of one recorded post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexKey {
    /// Author.
    pub user_id: i64,
    /// Chat.
    pub group_id: i64,
    /// Message id within the chat.
    pub message_id: i64,
}

/// Why a stored key could not be read back.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyParseError {
    /// Key does not have exactly four `:` separated segments.
    #[error("expected 4 segments, found {0}")]
    Arity(usize),
    /// First segment is not the `message` namespace.
    #[error("unexpected namespace `{0}`")]
    Namespace(String),
    /// A numeric segment failed to parse.
    #[error("segment `{segment}` of field {field} is not an integer")]
    NotAnInteger {
        /// Field name.
        field: &'static str,
        /// Raw text.
        segment: String,
    },
}

impl IndexKey {
    /// Builds the key for a post.
    #[must_use]
    pub const fn new(user_id: i64, group_id: i64, message_id: i64) -> Self {
        Self {
            user_id,
            group_id,
            message_id,
        }
    }

    /// Prefix shared by every key of `user_id`.
    ///
    /// The trailing separator keeps user `12` from matching keys of user `123`.
    #[must_use]
    pub fn user_prefix(user_id: i64) -> String {
        format!("{NAMESPACE}:{user_id}:")
    }

    /// The message this key points at.
    #[must_use]
    pub const fn message(&self) -> MessageRef {
        MessageRef {
            group_id: self.group_id,
            message_id: self.message_id,
        }
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{NAMESPACE}:{}:{}:{}",
            self.user_id, self.group_id, self.message_id
        )
    }
}

impl FromStr for IndexKey {
    type Err = KeyParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let segments: Vec<&str> = raw.split(':').collect();
        if segments.len() != 4 {
            return Err(KeyParseError::Arity(segments.len()));
        }
        if segments[0] != NAMESPACE {
            return Err(KeyParseError::Namespace(segments[0].to_string()));
        }
        Ok(Self {
            user_id: parse_id("user_id", segments[1])?,
            group_id: parse_id("group_id", segments[2])?,
            message_id: parse_id("message_id", segments[3])?,
        })
    }
}

fn parse_id(field: &'static str, segment: &str) -> Result<i64, KeyParseError> {
    segment.parse().map_err(|_| KeyParseError::NotAnInteger {
        field,
        segment: segment.to_string(),
    })
}

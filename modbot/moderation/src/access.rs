use std::{collections::HashSet, str::FromStr};

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

/// Which chats get their messages recorded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestScope {
    /// Every chat the bot can see.
    #[default]
    All,
    /// Only chats listed in the moderated group set.
    Groups,
}

impl FromStr for IngestScope {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "groups" => Ok(Self::Groups),
            other => Err(format!("unknown ingest scope `{other}` (expected `all` or `groups`)")),
        }
    }
}

/// Static administrator allow-list and moderated group set.
///
/// Loaded once at startup and shared read-only.
#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
    admins: HashSet<i64>,
    groups: IndexSet<i64>,
    ingest_scope: IngestScope,
}

impl AccessPolicy {
    /// Creates the policy.
    #[must_use]
    pub fn new(
        admins: impl IntoIterator<Item = i64>,
        groups: impl IntoIterator<Item = i64>,
    ) -> Self {
        Self {
            admins: admins.into_iter().collect(),
            groups: groups.into_iter().collect(),
            ingest_scope: IngestScope::default(),
        }
    }

    /// Restricts or widens message recording.
    #[must_use]
    pub const fn with_ingest_scope(mut self, scope: IngestScope) -> Self {
        self.ingest_scope = scope;
        self
    }

    /// True when `user_id` may run privileged commands.
    #[must_use]
    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admins.contains(&user_id)
    }

    /// Groups a ban is applied to, in configuration order.
    #[must_use]
    pub const fn groups(&self) -> &IndexSet<i64> {
        &self.groups
    }

    /// Number of administrators.
    #[must_use]
    pub fn admin_count(&self) -> usize {
        self.admins.len()
    }

    /// Whether messages seen in `chat_id` should be recorded.
    #[must_use]
    pub fn records_chat(&self, chat_id: i64) -> bool {
        match self.ingest_scope {
            IngestScope::All => true,
            IngestScope::Groups => self.groups.contains(&chat_id),
        }
    }
}

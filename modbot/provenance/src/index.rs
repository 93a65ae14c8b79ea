use std::{fmt, sync::Arc, time::Duration};

use futures::StreamExt;
use indexmap::IndexSet;
use tracing::{debug, error, info, warn};

use crate::{
    key::{IndexKey, MessageRef},
    store::{scan, ExpiringStore},
};

/// Retention applied when none is configured: seven days.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

const DEFAULT_PAGE_SIZE: usize = 100;
const DELETE_CHUNK: usize = 500;

/// Reverse index from a user to the messages they posted.
///
/// Every operation is best-effort: store failures are logged here and turned
/// into "nothing recorded" / "nothing found" / "nothing deleted", because the
/// index is moderation metadata and must never break message handling.
#[derive(Clone)]
pub struct ProvenanceIndex {
    store: Arc<dyn ExpiringStore>,
    retention: Duration,
    page_size: usize,
}

impl fmt::Debug for ProvenanceIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvenanceIndex")
            .field("retention", &self.retention)
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

impl ProvenanceIndex {
    /// Creates an index over `store` whose records live for `retention`.
    #[must_use]
    pub fn new(store: Arc<dyn ExpiringStore>, retention: Duration) -> Self {
        Self {
            store,
            retention,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Overrides the number of keys requested per scan step.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Configured retention window.
    #[must_use]
    pub const fn retention(&self) -> Duration {
        self.retention
    }

    /// Records that `user_id` posted `message_id` in `group_id`.
    ///
    /// Recording the same post again only refreshes its expiry.
    pub async fn record(&self, group_id: i64, message_id: i64, user_id: i64) {
        let key = IndexKey::new(user_id, group_id, message_id).to_string();
        match self.store.put(&key, self.retention).await {
            Ok(()) => debug!(%key, ttl_secs = self.retention.as_secs(), "recorded post"),
            Err(err) => error!(
                user_id,
                group_id,
                message_id,
                error = %err,
                "failed to record post"
            ),
        }
    }

    /// Every message of `user_id` still inside the retention window.
    ///
    /// Malformed keys are skipped. A scan that fails part way returns what was
    /// read before the failure.
    pub async fn list_messages(&self, user_id: i64) -> Vec<MessageRef> {
        let prefix = IndexKey::user_prefix(user_id);
        let mut found = IndexSet::new();
        let mut keys = scan(self.store.as_ref(), &prefix, self.page_size);
        while let Some(item) = keys.next().await {
            let raw = match item {
                Ok(raw) => raw,
                Err(err) => {
                    error!(user_id, error = %err, "scan for user messages failed");
                    break;
                }
            };
            match raw.parse::<IndexKey>() {
                Ok(key) if key.user_id == user_id => {
                    found.insert(key.message());
                }
                Ok(_) => warn!(key = %raw, user_id, "skipping key of another user"),
                Err(err) => warn!(key = %raw, error = %err, "could not parse message key"),
            }
        }
        debug!(user_id, count = found.len(), "listed messages");
        found.into_iter().collect()
    }

    /// Distinct groups `user_id` posted in, in discovery order.
    pub async fn groups_of(&self, user_id: i64) -> IndexSet<i64> {
        self.list_messages(user_id)
            .await
            .into_iter()
            .map(|message| message.group_id)
            .collect()
    }

    /// Deletes every record of `user_id`, returning how many keys were removed.
    ///
    /// Returns 0 when the keys cannot be enumerated; if deletion fails part way
    /// the keys removed so far are reported.
    pub async fn purge(&self, user_id: i64) -> u64 {
        let prefix = IndexKey::user_prefix(user_id);
        let mut keys = IndexSet::new();
        let mut stream = scan(self.store.as_ref(), &prefix, self.page_size);
        while let Some(item) = stream.next().await {
            match item {
                Ok(key) => {
                    keys.insert(key);
                }
                Err(err) => {
                    error!(user_id, error = %err, "scan before purge failed");
                    return 0;
                }
            }
        }
        drop(stream);

        if keys.is_empty() {
            info!(user_id, "no stored keys to purge");
            return 0;
        }
        let keys: Vec<String> = keys.into_iter().collect();
        let mut deleted = 0;
        for chunk in keys.chunks(DELETE_CHUNK) {
            match self.store.delete_all(chunk).await {
                Ok(count) => deleted += count,
                Err(err) => {
                    error!(user_id, deleted, error = %err, "purge interrupted");
                    return deleted;
                }
            }
        }
        info!(user_id, deleted, "purged stored keys");
        deleted
    }
}

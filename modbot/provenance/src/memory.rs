use std::{collections::BTreeMap, ops::Bound, time::Duration};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::time::Instant;

use crate::store::{ExpiringStore, ScanCursor, ScanPage, StoreError};

/// In-process store with lazy expiry.
///
/// Keys are kept sorted so a scan cursor is simply the last key handed out,
/// which stays valid while other tasks insert or delete.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, Instant>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .values()
            .filter(|expires_at| **expires_at > now)
            .count()
    }

    /// True when no live key remains.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Inserts a raw key that bypasses the key scheme (used to seed bad data).
    pub fn insert_raw(&self, key: impl Into<String>, ttl: Duration) {
        self.entries.write().insert(key.into(), Instant::now() + ttl);
    }

    fn sweep(&self, now: Instant) {
        self.entries.write().retain(|_, expires_at| *expires_at > now);
    }
}

#[async_trait]
impl ExpiringStore for MemoryStore {
    async fn put(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        self.insert_raw(key, ttl);
        Ok(())
    }

    async fn scan_page(
        &self,
        prefix: &str,
        cursor: ScanCursor,
        count: usize,
    ) -> Result<ScanPage, StoreError> {
        let now = Instant::now();
        let lower = match cursor {
            ScanCursor::Start => Bound::Included(prefix.to_string()),
            ScanCursor::At(last) => Bound::Excluded(last),
        };
        let entries = self.entries.read();
        let mut keys = Vec::with_capacity(count);
        let mut last_seen = None;
        let mut exhausted = true;
        for (key, expires_at) in entries.range((lower, Bound::Unbounded)) {
            if !key.starts_with(prefix) {
                break;
            }
            if keys.len() == count {
                exhausted = false;
                break;
            }
            last_seen = Some(key.clone());
            if *expires_at > now {
                keys.push(key.clone());
            }
        }
        let next = if exhausted {
            None
        } else {
            last_seen.map(ScanCursor::At)
        };
        Ok(ScanPage { keys, next })
    }

    async fn delete_all(&self, keys: &[String]) -> Result<u64, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let mut removed = 0;
        for key in keys {
            if let Some(expires_at) = entries.remove(key) {
                if expires_at > now {
                    removed += 1;
                }
            }
        }
        drop(entries);
        self.sweep(now);
        Ok(removed)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Store used when no backend could be reached; every call fails.
#[derive(Debug, Clone)]
pub struct DisconnectedStore {
    reason: String,
}

impl DisconnectedStore {
    /// Creates the store, remembering why it is disconnected.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    fn unavailable(&self) -> StoreError {
        StoreError::Unavailable(self.reason.clone())
    }
}

#[async_trait]
impl ExpiringStore for DisconnectedStore {
    async fn put(&self, _key: &str, _ttl: Duration) -> Result<(), StoreError> {
        Err(self.unavailable())
    }

    async fn scan_page(
        &self,
        _prefix: &str,
        _cursor: ScanCursor,
        _count: usize,
    ) -> Result<ScanPage, StoreError> {
        Err(self.unavailable())
    }

    async fn delete_all(&self, _keys: &[String]) -> Result<u64, StoreError> {
        Err(self.unavailable())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Err(self.unavailable())
    }
}

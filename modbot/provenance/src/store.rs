use std::time::Duration;

use async_trait::async_trait;
use futures::{
    stream::{self, BoxStream},
    StreamExt, TryStreamExt,
};
use thiserror::Error;

/// Failures of the store backend.
///
/// Every variant is treated as "store unavailable" by the provenance index.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No connection, missing configuration, or connection dropped.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// The operation did not complete within its timeout.
    #[error("store operation `{op}` timed out after {after:?}")]
    Timeout {
        /// Operation name.
        op: &'static str,
        /// Timeout that elapsed.
        after: Duration,
    },
    /// The server answered with an error.
    #[error("store rejected `{op}`: {reason}")]
    Command {
        /// Operation name.
        op: &'static str,
        /// Server message.
        reason: String,
    },
}

/// Position of an incremental scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanCursor {
    /// Beginning of the key space.
    Start,
    /// Backend specific continuation token.
    At(String),
}

/// One step of an incremental scan.
#[derive(Debug, Clone, Default)]
pub struct ScanPage {
    /// Live keys found in this step; may be empty even when more follow.
    pub keys: Vec<String>,
    /// Where to continue, `None` once the scan is complete.
    pub next: Option<ScanCursor>,
}

/// Key-value store with per-key expiry, prefix scans and bulk delete.
///
/// Values carry no meaning; a key either exists or it does not.
#[async_trait]
pub trait ExpiringStore: Send + Sync {
    /// Inserts `key`, or refreshes its expiry, so that it lives for `ttl`.
    async fn put(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Returns roughly `count` live keys starting with `prefix` from `cursor`.
    ///
    /// Keys inserted or deleted while a scan is running may or may not be
    /// reported; keys present for the whole scan are reported at least once.
    async fn scan_page(
        &self,
        prefix: &str,
        cursor: ScanCursor,
        count: usize,
    ) -> Result<ScanPage, StoreError>;

    /// Deletes `keys`, returning how many actually existed.
    async fn delete_all(&self, keys: &[String]) -> Result<u64, StoreError>;

    /// Round-trips to the backend.
    async fn ping(&self) -> Result<(), StoreError>;
}

/// Lazily walks every live key starting with `prefix`.
///
/// Each call starts a fresh cursor, so a failed scan can simply be restarted.
pub fn scan<'a>(
    store: &'a dyn ExpiringStore,
    prefix: &'a str,
    page_size: usize,
) -> BoxStream<'a, Result<String, StoreError>> {
    let page_size = page_size.max(1);
    stream::try_unfold(Some(ScanCursor::Start), move |cursor| async move {
        let Some(cursor) = cursor else {
            return Ok::<_, StoreError>(None);
        };
        let page = store.scan_page(prefix, cursor, page_size).await?;
        let keys = stream::iter(page.keys.into_iter().map(Ok::<_, StoreError>));
        Ok(Some((keys, page.next)))
    })
    .try_flatten()
    .boxed()
}

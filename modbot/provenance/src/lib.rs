#![deny(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs, rust_2018_idioms)]

//! Message provenance: which user posted which message in which group.
//!
//! The index stores nothing but keys of the form
//! `message:<user_id>:<group_id>:<message_id>` with a time-to-live, which is
//! enough to find and delete everything a user posted during the retention
//! window.

/// Expiring key-value store contract and its error type.
pub mod store;

/// In-memory and always-failing store backends.
pub mod memory;

/// Redis backend.
pub mod redis_store;

/// Key scheme for recorded posts.
pub mod key;

/// Domain layer over the store.
pub mod index;

pub use index::{ProvenanceIndex, DEFAULT_RETENTION};
pub use key::{IndexKey, KeyParseError, MessageRef};
pub use memory::{DisconnectedStore, MemoryStore};
pub use redis_store::{RedisSettings, RedisStore};
pub use store::{scan, ExpiringStore, ScanCursor, ScanPage, StoreError};

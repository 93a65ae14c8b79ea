#![deny(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs, rust_2018_idioms)]

//! Moderation events and the publishers that carry them.
//!
//! Events are emitted after a moderation action finishes so that other
//! processes (dashboards, log shippers) can follow what administrators did.

use std::{
    collections::VecDeque,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::{fs::OpenOptions, io::AsyncWriteExt, sync::broadcast};
use uuid::Uuid;

/// A moderation event encoded as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationEvent {
    /// Unique identifier.
    pub id: Uuid,
    /// Component that produced the event (`orchestrator`, `dispatch`).
    pub source: String,
    /// Dotted event type, e.g. `moderation.ban.completed`.
    pub event_type: String,
    /// Emission time.
    pub timestamp: DateTime<Utc>,
    /// Event specific payload.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl ModerationEvent {
    /// Creates an event stamped with a fresh id and the current time.
    #[must_use]
    pub fn new(
        source: impl Into<String>,
        event_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: source.into(),
            event_type: event_type.into(),
            timestamp: Utc::now(),
            payload,
        }
    }
}

/// Sink for moderation events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes one event.
    async fn publish(&self, event: ModerationEvent) -> Result<()>;
}

/// In-process broadcast bus that also keeps a bounded backlog.
#[derive(Debug, Clone)]
pub struct MemoryEventBus {
    sender: broadcast::Sender<ModerationEvent>,
    backlog: Arc<Mutex<VecDeque<ModerationEvent>>>,
    capacity: usize,
}

impl MemoryEventBus {
    /// Creates a bus retaining at most `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            backlog: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    /// Subscribes to events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ModerationEvent> {
        self.sender.subscribe()
    }

    /// Copy of the retained backlog, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ModerationEvent> {
        self.backlog.lock().iter().cloned().collect()
    }
}

#[async_trait]
impl EventPublisher for MemoryEventBus {
    async fn publish(&self, event: ModerationEvent) -> Result<()> {
        {
            let mut backlog = self.backlog.lock();
            backlog.push_back(event.clone());
            while backlog.len() > self.capacity {
                backlog.pop_front();
            }
        }
        // no subscribers is fine
        let _ = self.sender.send(event);
        Ok(())
    }
}

/// Publisher appending JSON lines to a file.
#[derive(Debug, Clone)]
pub struct FileEventPublisher {
    path: PathBuf,
}

impl FileEventPublisher {
    /// Creates the publisher, creating parent directories of `path`.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self { path })
    }
}

#[async_trait]
impl EventPublisher for FileEventPublisher {
    async fn publish(&self, event: ModerationEvent) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        let mut data = serde_json::to_vec(&event)?;
        data.push(b'\n');
        file.write_all(&data).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn ban_event(target: i64) -> ModerationEvent {
        ModerationEvent::new(
            "orchestrator",
            "moderation.ban.completed",
            json!({ "target_id": target }),
        )
    }

    #[tokio::test]
    async fn bus_delivers_to_subscribers() {
        let bus = MemoryEventBus::new(8);
        let mut rx = bus.subscribe();
        bus.publish(ban_event(1)).await.unwrap();
        let first = rx.recv().await.unwrap();
        assert_eq!(first.payload["target_id"], 1);
    }

    #[tokio::test]
    async fn backlog_is_bounded() {
        let bus = MemoryEventBus::new(2);
        for target in 1..=3 {
            bus.publish(ban_event(target)).await.unwrap();
        }
        let backlog = bus.snapshot();
        assert_eq!(backlog.len(), 2);
        assert_eq!(backlog[0].payload["target_id"], 2);
    }

    #[tokio::test]
    async fn file_publisher_appends_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events/moderation.jsonl");
        let publisher = FileEventPublisher::new(&path).unwrap();
        publisher.publish(ban_event(7)).await.unwrap();
        publisher.publish(ban_event(8)).await.unwrap();

        let content = std::fs::read_to_string(path).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.contains("moderation.ban.completed"));
    }
}

use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::Result;
use modbot_events::{EventPublisher, ModerationEvent};
use modbot_logging::{AuditLogger, AuditRecord};
use serde_json::Value;

/// Builder for [`ModerationTelemetry`].
pub struct ModerationTelemetryBuilder {
    source: String,
    audit_path: Option<PathBuf>,
    publisher: Option<Arc<dyn EventPublisher>>,
}

impl ModerationTelemetryBuilder {
    /// Starts a builder for events emitted by `source`.
    #[must_use]
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            audit_path: None,
            publisher: None,
        }
    }

    /// Writes audit records to this JSON-lines file.
    #[must_use]
    pub fn audit_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.audit_path = Some(path.into());
        self
    }

    /// Publishes moderation events here.
    #[must_use]
    pub fn event_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Opens the audit log and finishes the handle.
    pub fn build(self) -> Result<ModerationTelemetry> {
        let audit = self.audit_path.map(AuditLogger::open).transpose()?;
        Ok(ModerationTelemetry {
            inner: Arc::new(TelemetryInner {
                source: self.source,
                audit,
                publisher: self.publisher,
            }),
        })
    }
}

/// Cheaply clonable handle to the audit log and event publisher.
#[derive(Clone)]
pub struct ModerationTelemetry {
    inner: Arc<TelemetryInner>,
}

struct TelemetryInner {
    source: String,
    audit: Option<AuditLogger>,
    publisher: Option<Arc<dyn EventPublisher>>,
}

impl fmt::Debug for ModerationTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModerationTelemetry")
            .field("source", &self.inner.source)
            .field("audit", &self.inner.audit.as_ref().map(AuditLogger::path))
            .field("publishes", &self.inner.publisher.is_some())
            .finish()
    }
}

impl ModerationTelemetry {
    /// Returns a builder.
    #[must_use]
    pub fn builder(source: impl Into<String>) -> ModerationTelemetryBuilder {
        ModerationTelemetryBuilder::new(source)
    }

    /// Appends an audit record when an audit log is configured.
    pub fn audit(&self, record: &AuditRecord) -> Result<()> {
        if let Some(audit) = &self.inner.audit {
            audit.append(record)?;
        }
        Ok(())
    }

    /// Publishes an event when a publisher is configured.
    pub async fn event(&self, event_type: &str, payload: Value) -> Result<()> {
        if let Some(publisher) = &self.inner.publisher {
            publisher
                .publish(ModerationEvent::new(
                    self.inner.source.clone(),
                    event_type,
                    payload,
                ))
                .await?;
        }
        Ok(())
    }
}

#![deny(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs, rust_2018_idioms)]

//! Logging utilities shared by the moderation crates.
//!
//! Diagnostics go through `tracing`; moderation actions that administrators may
//! need to reconstruct later are additionally appended to a JSON-lines audit log.

use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Installs the global `tracing` subscriber.
///
/// `filter` uses the env-filter directive syntax (`info`, `modbot=debug,warn`).
/// Invalid directives fall back to `info`. Calling this twice is harmless; the
/// second installation attempt is ignored.
pub fn init_tracing(filter: &str) {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

/// Outcome class of an audited moderation action.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    /// Every call of the action succeeded.
    Complete,
    /// Some calls failed; the action still ran to the end.
    Partial,
    /// The action was refused before doing anything.
    Refused,
}

/// One audit line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Time the record was produced.
    pub timestamp: DateTime<Utc>,
    /// Action name, e.g. `ban_and_purge`.
    pub action: String,
    /// Administrator who invoked the action.
    pub actor_id: i64,
    /// User the action targeted.
    pub target_id: i64,
    /// Outcome class.
    pub outcome: AuditOutcome,
    /// Free-form counters and details.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub details: serde_json::Map<String, serde_json::Value>,
}

impl AuditRecord {
    /// Creates a record stamped with the current time.
    #[must_use]
    pub fn new(
        action: impl Into<String>,
        actor_id: i64,
        target_id: i64,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            action: action.into(),
            actor_id,
            target_id,
            outcome,
            details: serde_json::Map::new(),
        }
    }

    /// Attaches details taken from a JSON object; other values are ignored.
    #[must_use]
    pub fn with_details(mut self, details: &serde_json::Value) -> Self {
        if let Some(obj) = details.as_object() {
            self.details = obj.clone();
        }
        self
    }
}

/// Append-only JSON-lines audit log, safe to share between tasks.
#[derive(Debug)]
pub struct AuditLogger {
    path: PathBuf,
    writer: Mutex<File>,
}

impl AuditLogger {
    /// Opens (or creates) the audit log at `path`, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(file),
        })
    }

    /// Appends one record and flushes.
    pub fn append(&self, record: &AuditRecord) -> Result<()> {
        let mut writer = self.writer.lock();
        serde_json::to_writer(&mut *writer, record)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    /// Location of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn appends_json_lines() {
        let dir = tempdir().unwrap();
        let logger = AuditLogger::open(dir.path().join("audit/bans.jsonl")).unwrap();
        logger
            .append(&AuditRecord::new("ban_and_purge", 1, 42, AuditOutcome::Complete))
            .unwrap();
        logger
            .append(
                &AuditRecord::new("ban_and_purge", 1, 43, AuditOutcome::Partial)
                    .with_details(&json!({ "delete_failed": 2 })),
            )
            .unwrap();

        let content = fs::read_to_string(logger.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"outcome\":\"complete\""));
        assert!(!lines[0].contains("details"));
        let second: AuditRecord = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second.target_id, 43);
        assert_eq!(second.details["delete_failed"], 2);
    }

    #[test]
    fn non_object_details_are_ignored() {
        let record = AuditRecord::new("x", 1, 2, AuditOutcome::Refused).with_details(&json!(7));
        assert!(record.details.is_empty());
    }
}

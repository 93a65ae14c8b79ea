use std::{fmt, future::Future, sync::Arc, time::Duration};

use futures::future::join_all;
use modbot_logging::{AuditOutcome, AuditRecord};
use modbot_provenance::{MessageRef, ProvenanceIndex};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::{
    access::AccessPolicy,
    platform::{ChatPlatform, PlatformError},
    telemetry::ModerationTelemetry,
};

/// Errors that stop a moderation action before it starts.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModerationError {
    /// The invoker is not on the administrator allow-list.
    #[error("user {0} is not an administrator")]
    NotAuthorized(i64),
}

/// Pacing of the platform fan-out.
#[derive(Debug, Clone, Copy)]
pub struct FanOutPolicy {
    /// Deletions issued concurrently per batch.
    pub batch_size: usize,
    /// Pause after every deletion batch.
    pub batch_pause: Duration,
    /// Budget of a single platform call.
    pub call_timeout: Duration,
}

impl Default for FanOutPolicy {
    fn default() -> Self {
        Self {
            batch_size: 20,
            batch_pause: Duration::from_secs(1),
            call_timeout: Duration::from_secs(15),
        }
    }
}

/// Per-phase counts of one ban-and-purge run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BanReport {
    /// Banned user.
    pub target_id: i64,
    /// Messages found in the index.
    pub messages_found: usize,
    /// Deletions the platform accepted.
    pub deleted: usize,
    /// Deletions that failed or timed out.
    pub delete_failed: usize,
    /// Deletion batches issued.
    pub batches: usize,
    /// Groups the ban was applied in.
    pub bans_applied: usize,
    /// Groups where the ban failed.
    pub bans_failed: usize,
    /// Index keys removed afterwards.
    pub purged: u64,
}

impl BanReport {
    /// True when no platform call failed.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.delete_failed == 0 && self.bans_failed == 0
    }

    /// One-line summary of the counts.
    #[must_use]
    pub fn counts_line(&self) -> String {
        format!(
            "Deleted {}/{} messages, banned in {}/{} groups, cleared {} stored records.",
            self.deleted,
            self.messages_found,
            self.bans_applied,
            self.bans_applied + self.bans_failed,
            self.purged
        )
    }
}

/// Deletes everything a user posted, bans them from every moderated group and
/// clears their records from the index.
///
/// Individual platform failures are logged and counted; they never stop the
/// remaining calls. Re-running for the same user is harmless.
pub struct BulkModerator {
    index: ProvenanceIndex,
    platform: Arc<dyn ChatPlatform>,
    access: Arc<AccessPolicy>,
    policy: FanOutPolicy,
    telemetry: Option<ModerationTelemetry>,
}

impl fmt::Debug for BulkModerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BulkModerator")
            .field("index", &self.index)
            .field("groups", &self.access.groups().len())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl BulkModerator {
    /// Creates a moderator with the default pacing.
    #[must_use]
    pub fn new(
        index: ProvenanceIndex,
        platform: Arc<dyn ChatPlatform>,
        access: Arc<AccessPolicy>,
    ) -> Self {
        Self {
            index,
            platform,
            access,
            policy: FanOutPolicy::default(),
            telemetry: None,
        }
    }

    /// Overrides the pacing.
    #[must_use]
    pub const fn with_policy(mut self, policy: FanOutPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Attaches audit and event sinks.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: ModerationTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Bans `target_id` everywhere and removes their recorded messages.
    pub async fn ban_and_purge(
        &self,
        target_id: i64,
        invoking_admin_id: i64,
    ) -> Result<BanReport, ModerationError> {
        if !self.access.is_admin(invoking_admin_id) {
            warn!(invoking_admin_id, target_id, "refusing ban from non-admin");
            self.audit(AuditRecord::new(
                "ban_and_purge",
                invoking_admin_id,
                target_id,
                AuditOutcome::Refused,
            ));
            return Err(ModerationError::NotAuthorized(invoking_admin_id));
        }

        let messages = self.index.list_messages(target_id).await;
        info!(
            target_id,
            invoking_admin_id,
            messages = messages.len(),
            groups = self.access.groups().len(),
            "starting ban and purge"
        );
        let mut report = BanReport {
            target_id,
            messages_found: messages.len(),
            ..BanReport::default()
        };

        self.delete_phase(&messages, &mut report).await;
        self.ban_phase(target_id, &mut report).await;
        report.purged = self.index.purge(target_id).await;

        info!(
            target_id,
            deleted = report.deleted,
            delete_failed = report.delete_failed,
            bans_applied = report.bans_applied,
            bans_failed = report.bans_failed,
            purged = report.purged,
            "ban and purge finished"
        );
        self.report(invoking_admin_id, &report).await;
        Ok(report)
    }

    async fn delete_phase(&self, messages: &[MessageRef], report: &mut BanReport) {
        let batch_size = self.policy.batch_size.max(1);
        for (ordinal, batch) in messages.chunks(batch_size).enumerate() {
            let outcomes = join_all(batch.iter().map(|message| self.delete_one(*message))).await;
            let accepted = outcomes.iter().filter(|ok| **ok).count();
            report.deleted += accepted;
            report.delete_failed += batch.len() - accepted;
            report.batches += 1;
            debug!(batch = ordinal + 1, size = batch.len(), accepted, "delete batch done");
            sleep(self.policy.batch_pause).await;
        }
    }

    async fn delete_one(&self, message: MessageRef) -> bool {
        let call = self
            .platform
            .delete_message(message.group_id, message.message_id);
        match self.bounded("deleteMessage", call).await {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    group_id = message.group_id,
                    message_id = message.message_id,
                    error = %err,
                    "failed to delete message"
                );
                false
            }
        }
    }

    async fn ban_phase(&self, target_id: i64, report: &mut BanReport) {
        for &group_id in self.access.groups() {
            let call = self.platform.ban_chat_member(group_id, target_id, true);
            match self.bounded("banChatMember", call).await {
                Ok(()) => report.bans_applied += 1,
                Err(err) => {
                    warn!(group_id, target_id, error = %err, "failed to ban user in group");
                    report.bans_failed += 1;
                }
            }
        }
    }

    async fn bounded<T, F>(&self, method: &'static str, call: F) -> Result<T, PlatformError>
    where
        F: Future<Output = Result<T, PlatformError>> + Send,
    {
        timeout(self.policy.call_timeout, call)
            .await
            .unwrap_or_else(|_| {
                Err(PlatformError::Timeout {
                    method,
                    after: self.policy.call_timeout,
                })
            })
    }

    async fn report(&self, invoking_admin_id: i64, report: &BanReport) {
        let Some(telemetry) = &self.telemetry else {
            return;
        };
        let outcome = if report.is_complete() {
            AuditOutcome::Complete
        } else {
            AuditOutcome::Partial
        };
        let details = serde_json::to_value(report).unwrap_or_default();
        self.audit(
            AuditRecord::new("ban_and_purge", invoking_admin_id, report.target_id, outcome)
                .with_details(&details),
        );
        if let Err(err) = telemetry
            .event(
                "moderation.ban.completed",
                json!({ "invoking_admin_id": invoking_admin_id, "report": details }),
            )
            .await
        {
            warn!(error = %err, "failed to publish moderation event");
        }
    }

    fn audit(&self, record: AuditRecord) {
        if let Some(telemetry) = &self.telemetry {
            if let Err(err) = telemetry.audit(&record) {
                warn!(error = %err, "failed to append audit record");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{PlatformCall, RecordingPlatform};
    use modbot_events::MemoryEventBus;
    use modbot_provenance::{ExpiringStore, MemoryStore, DEFAULT_RETENTION};
    use tempfile::tempdir;
    use tokio::time::Instant;

    struct Fixture {
        index: ProvenanceIndex,
        platform: Arc<RecordingPlatform>,
        moderator: BulkModerator,
    }

    fn fixture(groups: &[i64], platform: RecordingPlatform) -> Fixture {
        let store: Arc<dyn ExpiringStore> = Arc::new(MemoryStore::new());
        let index = ProvenanceIndex::new(store, DEFAULT_RETENTION);
        let platform = Arc::new(platform);
        let access = Arc::new(AccessPolicy::new([1], groups.iter().copied()));
        let moderator = BulkModerator::new(index.clone(), platform.clone(), access);
        Fixture {
            index,
            platform,
            moderator,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn bans_in_every_configured_group() {
        let fx = fixture(&[1, 2, 3], RecordingPlatform::default());
        fx.index.record(1, 10, 42).await;
        fx.index.record(1, 11, 42).await;

        let report = fx.moderator.ban_and_purge(42, 1).await.unwrap();

        let bans: Vec<(i64, i64, bool)> = fx
            .platform
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                PlatformCall::Ban {
                    chat_id,
                    user_id,
                    revoke_messages,
                } => Some((chat_id, user_id, revoke_messages)),
                _ => None,
            })
            .collect();
        assert_eq!(bans, vec![(1, 42, true), (2, 42, true), (3, 42, true)]);
        assert_eq!(report.bans_applied, 3);
        assert_eq!(report.deleted, 2);
        assert_eq!(report.purged, 2);
        assert!(report.is_complete());
    }

    #[tokio::test(start_paused = true)]
    async fn deletes_in_paced_concurrent_batches() {
        let platform = RecordingPlatform::default().with_delete_latency(Duration::from_millis(10));
        let fx = fixture(&[], platform);
        for message in 0..45 {
            fx.index.record(-100, message, 42).await;
        }

        let report = fx.moderator.ban_and_purge(42, 1).await.unwrap();
        assert_eq!(report.batches, 3);
        assert_eq!(report.deleted, 45);

        let starts: Vec<Instant> = fx
            .platform
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                PlatformCall::Delete { started_at, .. } => Some(started_at),
                _ => None,
            })
            .collect();
        let mut waves: Vec<(Instant, usize)> = Vec::new();
        for start in starts {
            match waves.last_mut() {
                Some((at, count)) if *at == start => *count += 1,
                _ => waves.push((start, 1)),
            }
        }
        assert_eq!(
            waves.iter().map(|(_, count)| *count).collect::<Vec<_>>(),
            vec![20, 20, 5]
        );
        for pair in waves.windows(2) {
            assert!(pair[1].0 - pair[0].0 >= Duration::from_secs(1));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_delete_does_not_stop_the_run() {
        let platform = RecordingPlatform::default()
            .failing_delete(-100, 3)
            .failing_ban(2);
        let fx = fixture(&[1, 2, 3], platform);
        for message in 0..25 {
            fx.index.record(-100, message, 42).await;
        }

        let report = fx.moderator.ban_and_purge(42, 1).await.unwrap();

        let deletes = fx
            .platform
            .calls()
            .iter()
            .filter(|call| matches!(call, PlatformCall::Delete { .. }))
            .count();
        assert_eq!(deletes, 25);
        assert_eq!(report.deleted, 24);
        assert_eq!(report.delete_failed, 1);
        assert_eq!(report.bans_applied, 2);
        assert_eq!(report.bans_failed, 1);
        assert_eq!(report.purged, 25);
        assert!(fx.index.list_messages(42).await.is_empty());
        assert!(!report.is_complete());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_calls_time_out_as_failures() {
        let platform = RecordingPlatform::default().with_delete_latency(Duration::from_secs(60));
        let fx = fixture(&[], platform);
        fx.index.record(-1, 1, 42).await;
        let moderator = fx.moderator.with_policy(FanOutPolicy {
            call_timeout: Duration::from_secs(2),
            ..FanOutPolicy::default()
        });

        let report = moderator.ban_and_purge(42, 1).await.unwrap();
        assert_eq!(report.delete_failed, 1);
        assert_eq!(report.purged, 1);
    }

    #[tokio::test]
    async fn non_admin_is_refused_without_side_effects() {
        let fx = fixture(&[1], RecordingPlatform::default());
        fx.index.record(1, 10, 42).await;

        let result = fx.moderator.ban_and_purge(42, 999).await;
        assert_eq!(result, Err(ModerationError::NotAuthorized(999)));
        assert!(fx.platform.calls().is_empty());
        assert_eq!(fx.index.list_messages(42).await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reports_through_telemetry() {
        let dir = tempdir().unwrap();
        let bus = Arc::new(MemoryEventBus::new(8));
        let telemetry = ModerationTelemetry::builder("orchestrator")
            .audit_log(dir.path().join("audit.jsonl"))
            .event_publisher(bus.clone())
            .build()
            .unwrap();
        let fx = fixture(&[1], RecordingPlatform::default());
        let moderator = fx.moderator.with_telemetry(telemetry);

        moderator.ban_and_purge(42, 1).await.unwrap();

        let audit = std::fs::read_to_string(dir.path().join("audit.jsonl")).unwrap();
        assert!(audit.contains("\"outcome\":\"complete\""));
        let events = bus.snapshot();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "moderation.ban.completed");
        assert_eq!(events[0].payload["report"]["target_id"], 42);
    }

    #[test]
    fn counts_line_mentions_every_phase() {
        let report = BanReport {
            target_id: 5,
            messages_found: 4,
            deleted: 3,
            delete_failed: 1,
            batches: 1,
            bans_applied: 2,
            bans_failed: 1,
            purged: 4,
        };
        assert_eq!(
            report.counts_line(),
            "Deleted 3/4 messages, banned in 2/3 groups, cleared 4 stored records."
        );
    }
}

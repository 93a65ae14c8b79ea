use std::{fmt, sync::Arc, time::Duration};

use modbot_provenance::ProvenanceIndex;
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::{
    access::AccessPolicy,
    command::{BotCommand, CommandInvocation},
    orchestrator::{BulkModerator, FanOutPolicy},
    platform::ChatPlatform,
    telemetry::ModerationTelemetry,
};

const GREETING: &str = "Hi! I am your group moderation bot.";

/// Sender of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// User id.
    pub id: i64,
    /// First name.
    pub first_name: String,
    /// Last name.
    #[serde(default)]
    pub last_name: Option<String>,
    /// Public username without `@`.
    #[serde(default)]
    pub username: Option<String>,
    /// IETF language tag of the client.
    #[serde(default)]
    pub language_code: Option<String>,
}

impl UserProfile {
    /// First and last name joined by a space.
    #[must_use]
    pub fn full_name(&self) -> String {
        match &self.last_name {
            Some(last) => format!("{} {last}", self.first_name),
            None => self.first_name.clone(),
        }
    }

    fn describe(&self) -> String {
        format!(
            "User Information:\nName: {}\nUsername: @{}\nID: {}\nLanguage: {}",
            self.full_name(),
            self.username.as_deref().unwrap_or("N/A"),
            self.id,
            self.language_code.as_deref().unwrap_or("N/A"),
        )
    }
}

/// A message observed in a chat, as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Chat the message was posted in.
    pub chat_id: i64,
    /// Message id within the chat.
    pub message_id: i64,
    /// Author; absent for anonymous channel posts.
    pub from: Option<UserProfile>,
    /// Text or caption.
    pub text: Option<String>,
    /// Message this one replies to.
    pub reply_to: Option<Box<InboundMessage>>,
}

/// What [`CommandDispatcher::dispatch`] did with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The post was recorded in the provenance index.
    Recorded,
    /// The post was outside the ingestion scope.
    Skipped,
    /// A command ran and a reply was sent.
    Replied,
    /// A privileged command from a non-admin; nothing was done or sent.
    Unauthorized,
    /// Nothing to do (no sender, foreign or unknown command).
    Ignored,
}

/// Builder for [`CommandDispatcher`].
pub struct CommandDispatcherBuilder {
    index: ProvenanceIndex,
    platform: Arc<dyn ChatPlatform>,
    access: Arc<AccessPolicy>,
    policy: FanOutPolicy,
    telemetry: Option<ModerationTelemetry>,
    bot_username: Option<String>,
}

impl CommandDispatcherBuilder {
    /// Overrides the fan-out pacing used by `/banall`.
    #[must_use]
    pub const fn policy(mut self, policy: FanOutPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Attaches audit and event sinks.
    #[must_use]
    pub fn telemetry(mut self, telemetry: ModerationTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Sets the bot's own username so `/cmd@otherbot` can be ignored.
    #[must_use]
    pub fn bot_username(mut self, username: impl Into<String>) -> Self {
        self.bot_username = Some(username.into());
        self
    }

    /// Finishes the dispatcher.
    #[must_use]
    pub fn build(self) -> CommandDispatcher {
        let mut moderator = BulkModerator::new(
            self.index.clone(),
            Arc::clone(&self.platform),
            Arc::clone(&self.access),
        )
        .with_policy(self.policy);
        if let Some(telemetry) = self.telemetry {
            moderator = moderator.with_telemetry(telemetry);
        }
        CommandDispatcher {
            index: self.index,
            platform: self.platform,
            access: self.access,
            moderator,
            bot_username: self.bot_username,
            call_timeout: self.policy.call_timeout,
        }
    }
}

/// Routes inbound messages: ordinary posts are recorded, commands are run.
///
/// Privileged commands from non-admins are dropped without a reply so that
/// their existence is not revealed.
pub struct CommandDispatcher {
    index: ProvenanceIndex,
    platform: Arc<dyn ChatPlatform>,
    access: Arc<AccessPolicy>,
    moderator: BulkModerator,
    bot_username: Option<String>,
    call_timeout: Duration,
}

impl fmt::Debug for CommandDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandDispatcher")
            .field("moderator", &self.moderator)
            .field("bot_username", &self.bot_username)
            .finish_non_exhaustive()
    }
}

impl CommandDispatcher {
    /// Starts a builder.
    #[must_use]
    pub fn builder(
        index: ProvenanceIndex,
        platform: Arc<dyn ChatPlatform>,
        access: Arc<AccessPolicy>,
    ) -> CommandDispatcherBuilder {
        CommandDispatcherBuilder {
            index,
            platform,
            access,
            policy: FanOutPolicy::default(),
            telemetry: None,
            bot_username: None,
        }
    }

    /// Handles one inbound message.
    pub async fn dispatch(&self, message: &InboundMessage) -> DispatchOutcome {
        let Some(sender) = &message.from else {
            return DispatchOutcome::Ignored;
        };
        let Some(invocation) = message.text.as_deref().and_then(CommandInvocation::parse) else {
            return self.ingest(message, sender).await;
        };
        if !invocation.is_for(self.bot_username.as_deref()) {
            debug!(chat_id = message.chat_id, "command addressed to another bot");
            return DispatchOutcome::Ignored;
        }
        if invocation.command.requires_admin() && !self.access.is_admin(sender.id) {
            debug!(
                user_id = sender.id,
                command = ?invocation.command,
                "ignoring privileged command"
            );
            return DispatchOutcome::Unauthorized;
        }

        match invocation.command {
            BotCommand::Start => self.reply(message, GREETING).await,
            BotCommand::UserId => self.user_id(message).await,
            BotCommand::UserIsJoin => self.user_groups(message).await,
            BotCommand::BanAll => self.ban_all(message, sender).await,
            BotCommand::Other(name) => {
                debug!(%name, "unknown command");
                DispatchOutcome::Ignored
            }
        }
    }

    async fn ingest(&self, message: &InboundMessage, sender: &UserProfile) -> DispatchOutcome {
        if !self.access.records_chat(message.chat_id) {
            return DispatchOutcome::Skipped;
        }
        self.index
            .record(message.chat_id, message.message_id, sender.id)
            .await;
        DispatchOutcome::Recorded
    }

    async fn user_id(&self, message: &InboundMessage) -> DispatchOutcome {
        let Some(target) = replied_author(message) else {
            return self
                .reply(message, "Please reply to a user's message to get their ID.")
                .await;
        };
        self.reply(message, &target.describe()).await
    }

    async fn user_groups(&self, message: &InboundMessage) -> DispatchOutcome {
        let Some(target) = replied_author(message) else {
            return self
                .reply(
                    message,
                    "Please reply to a user's message to check their group memberships.",
                )
                .await;
        };
        let groups = self.index.groups_of(target.id).await;
        if groups.is_empty() {
            let text = format!(
                "User {} (ID: {}) is not found in any groups.",
                target.full_name(),
                target.id
            );
            return self.reply(message, &text).await;
        }

        let mut lines = vec![format!(
            "User {} (ID: {}) is in the following groups:",
            target.full_name(),
            target.id
        )];
        for group_id in groups {
            let title = match timeout(self.call_timeout, self.platform.get_chat(group_id)).await {
                Ok(Ok(chat)) => chat.title,
                Ok(Err(err)) => {
                    warn!(group_id, error = %err, "could not resolve group");
                    None
                }
                Err(_) => {
                    warn!(group_id, "group lookup timed out");
                    None
                }
            };
            let title = title.unwrap_or_else(|| "Unknown Group".to_string());
            lines.push(format!("- {title} (ID: {group_id})"));
        }
        self.reply(message, &lines.join("\n")).await
    }

    async fn ban_all(&self, message: &InboundMessage, sender: &UserProfile) -> DispatchOutcome {
        let Some(target) = replied_author(message) else {
            return self
                .reply(message, "Please reply to a user's message to ban them.")
                .await;
        };
        match self.moderator.ban_and_purge(target.id, sender.id).await {
            Ok(report) => {
                let text = format!(
                    "User {} (ID: {}) has been banned from all groups and their messages \
                     have been deleted.\n{}",
                    target.full_name(),
                    target.id,
                    report.counts_line()
                );
                self.reply(message, &text).await
            }
            Err(err) => {
                warn!(error = %err, "ban rejected");
                DispatchOutcome::Unauthorized
            }
        }
    }

    async fn reply(&self, message: &InboundMessage, text: &str) -> DispatchOutcome {
        let call = self
            .platform
            .send_reply(message.chat_id, message.message_id, text);
        match timeout(self.call_timeout, call).await {
            Ok(Ok(())) => info!(chat_id = message.chat_id, "reply sent"),
            Ok(Err(err)) => warn!(chat_id = message.chat_id, error = %err, "reply failed"),
            Err(_) => warn!(chat_id = message.chat_id, "reply timed out"),
        }
        DispatchOutcome::Replied
    }
}

fn replied_author(message: &InboundMessage) -> Option<&UserProfile> {
    message.reply_to.as_ref().and_then(|reply| reply.from.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        access::IngestScope,
        testing::{PlatformCall, RecordingPlatform},
    };
    use modbot_provenance::{ExpiringStore, MemoryStore, DEFAULT_RETENTION};

    const ADMIN: i64 = 1;
    const SPAMMER: i64 = 42;

    fn user(id: i64, first_name: &str) -> UserProfile {
        UserProfile {
            id,
            first_name: first_name.into(),
            last_name: None,
            username: None,
            language_code: None,
        }
    }

    fn post(chat_id: i64, message_id: i64, from: UserProfile, text: &str) -> InboundMessage {
        InboundMessage {
            chat_id,
            message_id,
            from: Some(from),
            text: Some(text.into()),
            reply_to: None,
        }
    }

    fn command_replying_to(
        from: UserProfile,
        text: &str,
        target: &InboundMessage,
    ) -> InboundMessage {
        InboundMessage {
            reply_to: Some(Box::new(target.clone())),
            ..post(-1, 500, from, text)
        }
    }

    struct Fixture {
        index: ProvenanceIndex,
        platform: Arc<RecordingPlatform>,
        dispatcher: CommandDispatcher,
    }

    fn fixture(platform: RecordingPlatform, scope: IngestScope) -> Fixture {
        let store: Arc<dyn ExpiringStore> = Arc::new(MemoryStore::new());
        let index = ProvenanceIndex::new(store, DEFAULT_RETENTION);
        let platform = Arc::new(platform);
        let access = Arc::new(AccessPolicy::new([ADMIN], [-1, -2]).with_ingest_scope(scope));
        let dispatcher = CommandDispatcher::builder(index.clone(), platform.clone(), access)
            .bot_username("modbot")
            .build();
        Fixture {
            index,
            platform,
            dispatcher,
        }
    }

    #[tokio::test]
    async fn ordinary_messages_are_recorded() {
        let fx = fixture(RecordingPlatform::default(), IngestScope::All);
        let outcome = fx
            .dispatcher
            .dispatch(&post(-7, 3, user(SPAMMER, "Sam"), "buy now"))
            .await;
        assert_eq!(outcome, DispatchOutcome::Recorded);
        assert_eq!(fx.index.list_messages(SPAMMER).await.len(), 1);
        assert!(fx.platform.calls().is_empty());
    }

    #[tokio::test]
    async fn scoped_ingestion_skips_unlisted_chats() {
        let fx = fixture(RecordingPlatform::default(), IngestScope::Groups);
        let skipped = fx
            .dispatcher
            .dispatch(&post(-7, 3, user(SPAMMER, "Sam"), "hi"))
            .await;
        let recorded = fx
            .dispatcher
            .dispatch(&post(-1, 4, user(SPAMMER, "Sam"), "hi"))
            .await;
        assert_eq!(skipped, DispatchOutcome::Skipped);
        assert_eq!(recorded, DispatchOutcome::Recorded);
        assert_eq!(fx.index.list_messages(SPAMMER).await.len(), 1);
    }

    #[tokio::test]
    async fn start_greets() {
        let fx = fixture(RecordingPlatform::default(), IngestScope::All);
        let outcome = fx
            .dispatcher
            .dispatch(&post(-1, 9, user(5, "Ann"), "/start"))
            .await;
        assert_eq!(outcome, DispatchOutcome::Replied);
        assert_eq!(fx.platform.replies(), vec![GREETING.to_string()]);
        assert!(fx.index.list_messages(5).await.is_empty());
    }

    #[tokio::test]
    async fn user_id_describes_replied_author() {
        let fx = fixture(RecordingPlatform::default(), IngestScope::All);
        let mut author = user(SPAMMER, "Sam");
        author.last_name = Some("Spam".into());
        author.username = Some("sammy".into());
        let target = post(-1, 3, author, "spam");

        let outcome = fx
            .dispatcher
            .dispatch(&command_replying_to(user(7, "Bob"), "/user_id", &target))
            .await;
        assert_eq!(outcome, DispatchOutcome::Replied);
        assert_eq!(
            fx.platform.replies(),
            vec![
                "User Information:\nName: Sam Spam\nUsername: @sammy\nID: 42\nLanguage: N/A"
                    .to_string()
            ]
        );
    }

    #[tokio::test]
    async fn user_id_needs_a_reply() {
        let fx = fixture(RecordingPlatform::default(), IngestScope::All);
        fx.dispatcher
            .dispatch(&post(-1, 9, user(7, "Bob"), "/user_id"))
            .await;
        assert_eq!(
            fx.platform.replies(),
            vec!["Please reply to a user's message to get their ID.".to_string()]
        );
    }

    #[tokio::test]
    async fn user_groups_lists_titles_with_placeholders() {
        let fx = fixture(
            RecordingPlatform::default().with_chat(-1, "Main"),
            IngestScope::All,
        );
        fx.index.record(-1, 10, SPAMMER).await;
        fx.index.record(-1, 11, SPAMMER).await;
        fx.index.record(-99, 12, SPAMMER).await;
        let target = post(-1, 11, user(SPAMMER, "Sam"), "spam");

        fx.dispatcher
            .dispatch(&command_replying_to(user(ADMIN, "Root"), "/user_is_join", &target))
            .await;

        let replies = fx.platform.replies();
        assert_eq!(replies.len(), 1);
        let lines: Vec<&str> = replies[0].lines().collect();
        assert_eq!(lines[0], "User Sam (ID: 42) is in the following groups:");
        assert_eq!(lines.len(), 3);
        assert!(lines.contains(&"- Main (ID: -1)"));
        assert!(lines.contains(&"- Unknown Group (ID: -99)"));
    }

    #[tokio::test]
    async fn user_groups_reports_absence() {
        let fx = fixture(RecordingPlatform::default(), IngestScope::All);
        let target = post(-1, 11, user(SPAMMER, "Sam"), "spam");
        fx.dispatcher
            .dispatch(&command_replying_to(user(ADMIN, "Root"), "/user_is_join", &target))
            .await;
        assert_eq!(
            fx.platform.replies(),
            vec!["User Sam (ID: 42) is not found in any groups.".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn banall_runs_the_full_pipeline() {
        let fx = fixture(RecordingPlatform::default(), IngestScope::All);
        fx.index.record(-1, 10, SPAMMER).await;
        let target = post(-1, 10, user(SPAMMER, "Sam"), "spam");

        let outcome = fx
            .dispatcher
            .dispatch(&command_replying_to(user(ADMIN, "Root"), "/banall@modbot", &target))
            .await;

        assert_eq!(outcome, DispatchOutcome::Replied);
        let replies = fx.platform.replies();
        assert!(replies[0].starts_with(
            "User Sam (ID: 42) has been banned from all groups and their messages have been deleted."
        ));
        assert!(replies[0]
            .ends_with("Deleted 1/1 messages, banned in 2/2 groups, cleared 1 stored records."));
        assert!(fx.index.list_messages(SPAMMER).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn addressed_commands_run_when_own_username_is_unknown() {
        let store: Arc<dyn ExpiringStore> = Arc::new(MemoryStore::new());
        let index = ProvenanceIndex::new(store, DEFAULT_RETENTION);
        let platform = Arc::new(RecordingPlatform::default());
        let access = Arc::new(AccessPolicy::new([ADMIN], [-1]));
        let dispatcher =
            CommandDispatcher::builder(index.clone(), platform.clone(), access).build();
        index.record(-1, 10, SPAMMER).await;
        let target = post(-1, 10, user(SPAMMER, "Sam"), "spam");

        let outcome = dispatcher
            .dispatch(&command_replying_to(user(ADMIN, "Root"), "/banall@modbot", &target))
            .await;

        assert_eq!(outcome, DispatchOutcome::Replied);
        let calls = platform.calls();
        assert!(calls
            .iter()
            .any(|call| matches!(call, PlatformCall::Delete { chat_id: -1, message_id: 10, .. })));
        assert!(calls
            .iter()
            .any(|call| matches!(call, PlatformCall::Ban { chat_id: -1, user_id: SPAMMER, .. })));
        assert_eq!(platform.replies().len(), 1);
        assert!(index.list_messages(SPAMMER).await.is_empty());
    }

    #[tokio::test]
    async fn privileged_commands_are_silent_for_non_admins() {
        let fx = fixture(RecordingPlatform::default(), IngestScope::All);
        fx.index.record(-1, 10, SPAMMER).await;
        let target = post(-1, 10, user(SPAMMER, "Sam"), "spam");

        for text in ["/banall", "/user_is_join"] {
            let outcome = fx
                .dispatcher
                .dispatch(&command_replying_to(user(7, "Bob"), text, &target))
                .await;
            assert_eq!(outcome, DispatchOutcome::Unauthorized);
        }
        // even without a reply the command stays silent
        let bare = fx
            .dispatcher
            .dispatch(&post(-1, 11, user(7, "Bob"), "/banall"))
            .await;
        assert_eq!(bare, DispatchOutcome::Unauthorized);

        assert!(fx.platform.calls().is_empty());
        assert_eq!(fx.index.list_messages(SPAMMER).await.len(), 1);
        assert!(fx.index.list_messages(7).await.is_empty());
    }

    #[tokio::test]
    async fn foreign_and_unknown_commands_are_ignored() {
        let fx = fixture(RecordingPlatform::default(), IngestScope::All);
        let foreign = fx
            .dispatcher
            .dispatch(&post(-1, 1, user(ADMIN, "Root"), "/start@otherbot"))
            .await;
        let unknown = fx
            .dispatcher
            .dispatch(&post(-1, 2, user(ADMIN, "Root"), "/help"))
            .await;
        assert_eq!(foreign, DispatchOutcome::Ignored);
        assert_eq!(unknown, DispatchOutcome::Ignored);
        assert!(fx.platform.calls().is_empty());
        assert!(fx.index.list_messages(ADMIN).await.is_empty());
    }

    #[tokio::test]
    async fn anonymous_posts_are_ignored() {
        let fx = fixture(RecordingPlatform::default(), IngestScope::All);
        let message = InboundMessage {
            from: None,
            ..post(-1, 1, user(0, "x"), "channel post")
        };
        assert_eq!(fx.dispatcher.dispatch(&message).await, DispatchOutcome::Ignored);
    }

    #[tokio::test]
    async fn replies_are_threaded_to_the_command() {
        let fx = fixture(RecordingPlatform::default(), IngestScope::All);
        fx.dispatcher
            .dispatch(&post(-2, 77, user(5, "Ann"), "/start"))
            .await;
        assert!(matches!(
            fx.platform.calls().as_slice(),
            [PlatformCall::Reply { chat_id: -2, reply_to_message_id: 77, .. }]
        ));
    }
}

#![deny(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs, rust_2018_idioms)]

//! Moderation actions built on the provenance index: identity lookups,
//! group-membership lookups and ban-everywhere with message purge.

/// Outbound calls against the messaging platform.
pub mod platform;

/// Administrator allow-list, moderated groups and ingestion scope.
pub mod access;

/// Ban-and-purge fan-out.
pub mod orchestrator;

/// Bot command parsing.
pub mod command;

/// Routing of inbound messages to recording and commands.
pub mod dispatch;

/// Audit log and event hooks for moderation actions.
#[path = "../telemetry.rs"]
pub mod telemetry;

#[cfg(test)]
mod testing;

pub use access::{AccessPolicy, IngestScope};
pub use command::{BotCommand, CommandInvocation};
pub use dispatch::{
    CommandDispatcher, CommandDispatcherBuilder, DispatchOutcome, InboundMessage, UserProfile,
};
pub use orchestrator::{BanReport, BulkModerator, FanOutPolicy, ModerationError};
pub use platform::{ChatInfo, ChatPlatform, PlatformError};
pub use telemetry::{ModerationTelemetry, ModerationTelemetryBuilder};

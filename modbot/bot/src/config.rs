use std::{fmt, path::PathBuf, time::Duration};

use clap::Parser;
use modbot_moderation::{AccessPolicy, FanOutPolicy, IngestScope};
use modbot_provenance::{RedisSettings, DEFAULT_RETENTION};
use tracing::{error, info, warn};

/// Command line, with every option also readable from the environment.
#[derive(Parser, Debug)]
#[command(name = "modbot", version, about = "Telegram group moderation bot")]
pub struct Cli {
    /// Bot API token.
    #[arg(long, env = "BOT_TOKEN", hide_env_values = true)]
    pub bot_token: String,
    /// The bot's username; commands addressed to other bots are ignored.
    #[arg(long, env = "BOT_USERNAME")]
    pub bot_username: Option<String>,
    /// Comma-separated administrator user ids.
    #[arg(long, env = "ADMIN_IDS", default_value = "", allow_hyphen_values = true)]
    pub admin_ids: String,
    /// Comma-separated moderated group ids.
    #[arg(long, env = "GROUP_IDS", default_value = "", allow_hyphen_values = true)]
    pub group_ids: String,
    #[arg(long, env = "REDIS_HOST")]
    pub redis_host: Option<String>,
    #[arg(long, env = "REDIS_PORT", default_value_t = 6379)]
    pub redis_port: u16,
    #[arg(long, env = "REDIS_DB", default_value_t = 0)]
    pub redis_db: i64,
    #[arg(long, env = "REDIS_USER")]
    pub redis_user: Option<String>,
    #[arg(long, env = "REDIS_PASSWORD", hide_env_values = true)]
    pub redis_password: Option<String>,
    /// `true`, `1`, `t`, `y` or `yes` enables TLS.
    #[arg(long, env = "REDIS_SSL", default_value = "false")]
    pub redis_ssl: String,
    /// Seconds a recorded message stays in the index.
    #[arg(long, env = "MESSAGE_RETENTION")]
    pub message_retention: Option<String>,
    #[arg(long, env = "STORE_TIMEOUT_SECS", default_value_t = 10)]
    pub store_timeout_secs: u64,
    #[arg(long, env = "API_TIMEOUT_SECS", default_value_t = 15)]
    pub api_timeout_secs: u64,
    #[arg(long, env = "DELETE_BATCH_SIZE", default_value_t = 20)]
    pub delete_batch_size: usize,
    #[arg(long, env = "DELETE_BATCH_PAUSE_MS", default_value_t = 1000)]
    pub delete_batch_pause_ms: u64,
    /// `all` records every chat, `groups` only the moderated ones.
    #[arg(long, env = "INGEST_SCOPE", default_value = "all")]
    pub ingest_scope: IngestScope,
    #[arg(long, env = "POLL_TIMEOUT_SECS", default_value_t = 30)]
    pub poll_timeout_secs: u64,
    /// Updates handled concurrently.
    #[arg(long, env = "MAX_INFLIGHT", default_value_t = 64)]
    pub max_inflight: usize,
    /// Public base URL; when set updates arrive by webhook instead of polling.
    #[arg(long, env = "WEBHOOK_URL")]
    pub webhook_url: Option<String>,
    #[arg(long, env = "WEBHOOK_PORT", default_value_t = 8443)]
    pub webhook_port: u16,
    /// Echoed by Telegram in `X-Telegram-Bot-Api-Secret-Token`.
    #[arg(long, env = "WEBHOOK_SECRET", hide_env_values = true)]
    pub webhook_secret: Option<String>,
    /// JSON-lines audit log of moderation actions.
    #[arg(long, env = "AUDIT_LOG")]
    pub audit_log: Option<PathBuf>,
    /// JSON-lines log of moderation events.
    #[arg(long, env = "AUDIT_EVENTS")]
    pub audit_events: Option<PathBuf>,
    #[arg(long, env = "LOG_FILTER", default_value = "info")]
    pub log_filter: String,
}

/// Validated runtime configuration.
pub struct BotConfig {
    pub token: String,
    pub bot_username: Option<String>,
    pub access: AccessPolicy,
    pub redis: Option<RedisSettings>,
    pub retention: Duration,
    pub fan_out: FanOutPolicy,
    pub poll_timeout: Duration,
    pub max_inflight: usize,
    pub webhook: Option<WebhookSettings>,
    pub audit_log: Option<PathBuf>,
    pub audit_events: Option<PathBuf>,
}

/// Webhook transport; absent means long polling.
pub struct WebhookSettings {
    pub url: String,
    pub port: u16,
    pub secret: Option<String>,
}

impl WebhookSettings {
    /// Address registered with `setWebhook`.
    pub fn endpoint(&self) -> String {
        format!("{}{}", self.url.trim_end_matches('/'), crate::webhook::WEBHOOK_PATH)
    }
}

impl Cli {
    /// Applies the lenient parsing rules; malformed optional values are logged
    /// and replaced by their defaults rather than aborting startup.
    pub fn into_config(self) -> BotConfig {
        let admins = parse_id_list("ADMIN_IDS", &self.admin_ids);
        let groups = parse_id_list("GROUP_IDS", &self.group_ids);
        info!(admins = admins.len(), groups = groups.len(), "loaded access lists");

        let store_timeout = Duration::from_secs(self.store_timeout_secs);
        let redis = match self.redis_host {
            Some(host) if !host.trim().is_empty() => {
                if self.redis_user.is_none() {
                    warn!(%host, "REDIS_USER is not set; authentication might fail");
                }
                if self.redis_password.is_none() {
                    warn!(%host, "REDIS_PASSWORD is not set; authentication might fail");
                }
                Some(RedisSettings {
                    host,
                    port: self.redis_port,
                    db: self.redis_db,
                    username: self.redis_user,
                    password: self.redis_password,
                    tls: parse_flag(&self.redis_ssl),
                    op_timeout: store_timeout,
                })
            }
            _ => {
                warn!("REDIS_HOST is not set; running without a message index");
                None
            }
        };

        let webhook_secret = self.webhook_secret.filter(|secret| !secret.is_empty());
        let webhook = self
            .webhook_url
            .filter(|url| !url.trim().is_empty())
            .map(|url| WebhookSettings {
                url: url.trim().to_string(),
                port: self.webhook_port,
                secret: webhook_secret,
            });

        BotConfig {
            token: self.bot_token,
            bot_username: self.bot_username.filter(|name| !name.trim().is_empty()),
            access: AccessPolicy::new(admins, groups).with_ingest_scope(self.ingest_scope),
            redis,
            retention: parse_retention(self.message_retention.as_deref()),
            fan_out: FanOutPolicy {
                batch_size: self.delete_batch_size.max(1),
                batch_pause: Duration::from_millis(self.delete_batch_pause_ms),
                call_timeout: Duration::from_secs(self.api_timeout_secs),
            },
            poll_timeout: Duration::from_secs(self.poll_timeout_secs),
            max_inflight: self.max_inflight.max(1),
            webhook,
            audit_log: self.audit_log,
            audit_events: self.audit_events,
        }
    }
}

impl fmt::Debug for BotConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BotConfig")
            .field("token", &"Set")
            .field("bot_username", &self.bot_username)
            .field("access", &self.access)
            .field("redis", &self.redis)
            .field("retention", &self.retention)
            .field("fan_out", &self.fan_out)
            .field("webhook", &self.webhook)
            .finish_non_exhaustive()
    }
}

impl BotConfig {
    /// Logs the loaded configuration once; secrets only as `Set`/`Not Set`.
    pub fn log_summary(&self) {
        match &self.redis {
            Some(redis) => info!(?redis, "redis config"),
            None => info!(redis = "Not Set", "redis config"),
        }
        info!(
            admins = self.access.admin_count(),
            groups = self.access.groups().len(),
            retention_secs = self.retention.as_secs(),
            batch_size = self.fan_out.batch_size,
            batch_pause = ?self.fan_out.batch_pause,
            call_timeout = ?self.fan_out.call_timeout,
            poll_timeout = ?self.poll_timeout,
            max_inflight = self.max_inflight,
            webhook_port = ?self.webhook.as_ref().map(|webhook| webhook.port),
            audit_log = self.audit_log.is_some(),
            audit_events = self.audit_events.is_some(),
            "configuration loaded"
        );
    }
}

impl fmt::Debug for WebhookSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookSettings")
            .field("url", &self.url)
            .field("port", &self.port)
            .field("secret", &self.secret.as_ref().map_or("Not Set", |_| "Set"))
            .finish()
    }
}

/// Parses `1, 2,3`; one bad entry empties the whole list.
fn parse_id_list(name: &str, raw: &str) -> Vec<i64> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::parse::<i64>)
        .collect::<Result<Vec<_>, _>>()
        .unwrap_or_else(|err| {
            error!(
                variable = name,
                value = raw,
                error = %err,
                "invalid id list; using an empty set"
            );
            Vec::new()
        })
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "t" | "y" | "yes"
    )
}

fn parse_retention(raw: Option<&str>) -> Duration {
    let Some(raw) = raw else {
        return DEFAULT_RETENTION;
    };
    match raw.trim().parse::<i64>() {
        Ok(secs) if secs > 0 => {
            let retention = Duration::from_secs(secs.unsigned_abs());
            info!(secs, "message retention set");
            retention
        }
        Ok(_) => {
            warn!(
                default_secs = DEFAULT_RETENTION.as_secs(),
                "MESSAGE_RETENTION must be positive; using default"
            );
            DEFAULT_RETENTION
        }
        Err(err) => {
            error!(value = raw, error = %err, "invalid MESSAGE_RETENTION; using default");
            DEFAULT_RETENTION
        }
    }
}

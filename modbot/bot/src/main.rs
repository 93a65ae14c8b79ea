mod config;
mod handlers;
mod poller;
mod telegram;
mod webhook;

use std::{future::Future, sync::atomic::Ordering, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use modbot_events::FileEventPublisher;
use modbot_moderation::{CommandDispatcher, ModerationTelemetry};
use modbot_provenance::{DisconnectedStore, ExpiringStore, ProvenanceIndex, RedisStore};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::{
    config::{Cli, WebhookSettings},
    handlers::HandlerPool,
    poller::Poller,
    telegram::TelegramClient,
    webhook::WebhookReceiver,
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    modbot_logging::init_tracing(&cli.log_filter);
    let config = cli.into_config();
    config.log_summary();

    let store: Arc<dyn ExpiringStore> = match &config.redis {
        Some(settings) => match RedisStore::connect(settings).await {
            Ok(store) => {
                info!(host = %settings.host, "connected to redis");
                Arc::new(store)
            }
            Err(err) => {
                error!(error = %err, "redis unreachable; message index disabled");
                Arc::new(DisconnectedStore::new(err.to_string()))
            }
        },
        None => Arc::new(DisconnectedStore::new("REDIS_HOST is not set")),
    };
    let index = ProvenanceIndex::new(store, config.retention);

    let mut telemetry = ModerationTelemetry::builder("modbot");
    if let Some(path) = &config.audit_log {
        telemetry = telemetry.audit_log(path);
    }
    if let Some(path) = &config.audit_events {
        let publisher = FileEventPublisher::new(path)
            .with_context(|| format!("opening event log {}", path.display()))?;
        telemetry = telemetry.event_publisher(Arc::new(publisher));
    }
    let telemetry = telemetry.build().context("opening audit log")?;

    let client = Arc::new(
        TelegramClient::new(&config.token, config.fan_out.call_timeout)
            .context("building the Bot API client")?,
    );
    let access = Arc::new(config.access);
    if access.groups().is_empty() {
        warn!("GROUP_IDS is empty; /banall will only delete messages");
    }

    let bot_username = match config.bot_username {
        Some(username) => Some(username),
        None => resolve_username(&client).await,
    };
    let mut dispatcher = CommandDispatcher::builder(index, client.clone(), access)
        .policy(config.fan_out)
        .telemetry(telemetry);
    if let Some(username) = bot_username {
        info!(%username, "answering commands addressed to this bot");
        dispatcher = dispatcher.bot_username(username);
    }
    let pool = HandlerPool::new(Arc::new(dispatcher.build()), config.max_inflight);

    match &config.webhook {
        Some(settings) => serve_webhook(&client, settings, pool, config.max_inflight).await?,
        None => {
            if let Err(err) = client.delete_webhook().await {
                warn!(
                    error = %err,
                    "could not clear a previous webhook; polling may be refused"
                );
            }
            info!("polling for updates");
            Poller::new(client, pool, config.poll_timeout)
                .run(shutdown_signal())
                .await;
        }
    }
    info!("stopped");
    Ok(())
}

/// Asks the Bot API who we are; without an answer addressed commands are
/// accepted whatever the suffix.
async fn resolve_username(client: &TelegramClient) -> Option<String> {
    match client.get_me().await {
        Ok(me) => me.username,
        Err(err) => {
            warn!(error = %err, "getMe failed; accepting commands addressed to any bot");
            None
        }
    }
}

async fn serve_webhook(
    client: &TelegramClient,
    settings: &WebhookSettings,
    pool: HandlerPool,
    queue: usize,
) -> Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", settings.port))
        .await
        .with_context(|| format!("binding webhook port {}", settings.port))?;
    let receiver = WebhookReceiver::new(listener, pool, settings.secret.clone(), queue);
    let ready = receiver.readiness();
    let server = receiver.serve(shutdown_signal());
    tokio::pin!(server);

    let endpoint = settings.endpoint();
    tokio::select! {
        served = &mut server => return served,
        registered = client.set_webhook(&endpoint, settings.secret.as_deref()) => {
            match registered {
                Ok(()) => {
                    info!(%endpoint, "webhook registered");
                    ready.store(true, Ordering::Release);
                }
                Err(err) => error!(error = %err, "setWebhook failed; updates will not arrive"),
            }
        }
    }
    server.await
}

fn shutdown_signal() -> impl Future<Output = ()> {
    async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "could not listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}

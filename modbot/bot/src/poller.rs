use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{handlers::HandlerPool, telegram::UpdateSource};

const MIN_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Long-polls for updates and hands every message to the handler pool.
pub struct Poller {
    source: Arc<dyn UpdateSource>,
    pool: HandlerPool,
    wait: Duration,
}

impl Poller {
    #[must_use]
    pub fn new(source: Arc<dyn UpdateSource>, pool: HandlerPool, wait: Duration) -> Self {
        Self { source, pool, wait }
    }

    /// Polls until `shutdown` resolves, then waits for in-flight handlers.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        let mut offset = 0_i64;
        let mut backoff = MIN_BACKOFF;

        'poll: loop {
            let batch = tokio::select! {
                () = &mut shutdown => break 'poll,
                batch = self.source.updates(offset, self.wait) => batch,
            };
            let updates = match batch {
                Ok(updates) => {
                    backoff = MIN_BACKOFF;
                    updates
                }
                Err(err) => {
                    warn!(error = %err, retry_in = ?backoff, "polling failed");
                    tokio::select! {
                        () = &mut shutdown => break 'poll,
                        () = sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                    continue;
                }
            };

            for update in updates {
                offset = offset.max(update.update_id + 1);
                let Some(message) = update.into_inbound() else {
                    continue;
                };
                // every slot may stay busy for the length of a /banall
                let permit = tokio::select! {
                    () = &mut shutdown => break 'poll,
                    permit = self.pool.reserve() => permit,
                };
                let Some(permit) = permit else {
                    break 'poll;
                };
                self.pool.spawn(permit, message);
            }
        }

        info!("polling stopped");
        self.pool.drain().await;
    }
}

use std::sync::Arc;

use modbot_moderation::{CommandDispatcher, InboundMessage};
use tokio::{
    sync::{OwnedSemaphorePermit, Semaphore},
    task::JoinSet,
};
use tracing::{debug, error, info};

/// Runs each inbound message in its own task, at most `max_inflight` at once.
pub struct HandlerPool {
    dispatcher: Arc<CommandDispatcher>,
    permits: Arc<Semaphore>,
    tasks: JoinSet<()>,
}

impl HandlerPool {
    #[must_use]
    pub fn new(dispatcher: Arc<CommandDispatcher>, max_inflight: usize) -> Self {
        Self {
            dispatcher,
            permits: Arc::new(Semaphore::new(max_inflight.max(1))),
            tasks: JoinSet::new(),
        }
    }

    /// Waits for a free handler slot.
    pub async fn reserve(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.permits).acquire_owned().await.ok()
    }

    /// Starts a handler holding `permit` until it finishes.
    pub fn spawn(&mut self, permit: OwnedSemaphorePermit, message: InboundMessage) {
        let dispatcher = Arc::clone(&self.dispatcher);
        self.tasks.spawn(async move {
            let _permit = permit;
            let outcome = dispatcher.dispatch(&message).await;
            debug!(
                chat_id = message.chat_id,
                message_id = message.message_id,
                ?outcome,
                "update handled"
            );
        });
        self.reap();
    }

    fn reap(&mut self) {
        while let Some(joined) = self.tasks.try_join_next() {
            if let Err(err) = joined {
                error!(error = %err, "update handler failed");
            }
        }
    }

    /// Waits for every running handler.
    pub async fn drain(mut self) {
        info!(in_flight = self.tasks.len(), "draining handlers");
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(err) = joined {
                error!(error = %err, "update handler failed");
            }
        }
    }
}

//! Webhook transport: Telegram POSTs each update to `/webhook`.
//!
//! Endpoints:
//!   POST /webhook -> one update, answered as soon as it is queued
//!   GET  /        -> readiness; 503 until the webhook is registered

use std::{
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use modbot_moderation::InboundMessage;
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::mpsc};
use tracing::{debug, error, info, warn};

use crate::{handlers::HandlerPool, telegram::Update};

pub const WEBHOOK_PATH: &str = "/webhook";
const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

#[derive(Clone)]
struct WebhookState {
    updates: mpsc::Sender<InboundMessage>,
    ready: Arc<AtomicBool>,
    secret: Option<Arc<str>>,
}

fn router(state: WebhookState) -> Router {
    Router::new()
        .route("/", get(readiness))
        .route(WEBHOOK_PATH, post(receive_update))
        .with_state(state)
}

async fn readiness(State(state): State<WebhookState>) -> (StatusCode, Json<Value>) {
    if state.ready.load(Ordering::Acquire) {
        (
            StatusCode::OK,
            Json(json!({ "status": "OK", "message": "webhook registered" })),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "initializing" })),
        )
    }
}

async fn receive_update(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, &'static str) {
    if !state.ready.load(Ordering::Acquire) {
        return (StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable: Bot not ready.");
    }
    if let Some(secret) = &state.secret {
        let presented = headers.get(SECRET_HEADER).and_then(|value| value.to_str().ok());
        if presented != Some(&**secret) {
            warn!("webhook call with a missing or wrong secret token");
            return (StatusCode::UNAUTHORIZED, "Unauthorized");
        }
    }
    let update: Update = match serde_json::from_slice(&body) {
        Ok(update) => update,
        Err(err) => {
            warn!(error = %err, "undecodable webhook body");
            return (StatusCode::BAD_REQUEST, "Bad Request");
        }
    };
    debug!(update_id = update.update_id, "webhook update");
    if let Some(message) = update.into_inbound() {
        if state.updates.send(message).await.is_err() {
            return (StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable: shutting down.");
        }
    }
    (StatusCode::OK, "OK")
}

/// HTTP receiver feeding webhook updates into the handler pool.
pub struct WebhookReceiver {
    listener: TcpListener,
    pool: HandlerPool,
    ready: Arc<AtomicBool>,
    secret: Option<Arc<str>>,
    queue: usize,
}

impl WebhookReceiver {
    /// `queue` bounds accepted updates waiting for a handler slot.
    #[must_use]
    pub fn new(
        listener: TcpListener,
        pool: HandlerPool,
        secret: Option<String>,
        queue: usize,
    ) -> Self {
        Self {
            listener,
            pool,
            ready: Arc::new(AtomicBool::new(false)),
            secret: secret.map(Arc::from),
            queue: queue.max(1),
        }
    }

    /// Flag flipped once Telegram accepted the webhook; `GET /` reports it.
    #[must_use]
    pub fn readiness(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.ready)
    }

    /// Serves until `shutdown` resolves, then waits for in-flight handlers.
    pub async fn serve(self, shutdown: impl Future<Output = ()>) -> anyhow::Result<()> {
        let Self {
            listener,
            mut pool,
            ready,
            secret,
            queue,
        } = self;
        let (updates, mut inbox) = mpsc::channel(queue);
        let app = router(WebhookState {
            updates,
            ready,
            secret,
        });
        let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
        info!(addr = ?listener.local_addr().ok(), "webhook listening");
        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = stopped.await;
                })
                .await
        });

        tokio::pin!(shutdown);
        loop {
            let message = tokio::select! {
                () = &mut shutdown => break,
                message = inbox.recv() => message,
            };
            let Some(message) = message else {
                break;
            };
            let permit = tokio::select! {
                () = &mut shutdown => break,
                permit = pool.reserve() => permit,
            };
            let Some(permit) = permit else {
                break;
            };
            pool.spawn(permit, message);
        }

        let _ = stop.send(());
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!(error = %err, "webhook server failed"),
            Err(err) => error!(error = %err, "webhook server task failed"),
        }
        inbox.close();
        let dropped = std::iter::from_fn(|| inbox.try_recv().ok()).count();
        if dropped > 0 {
            warn!(dropped, "updates left unhandled at shutdown");
        }
        pool.drain().await;
        Ok(())
    }
}

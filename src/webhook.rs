//! HTTP surface Telegram pushes updates to.
//!
//! `POST /` always answers 200 so Telegram never redelivers an update; the
//! actual handling runs on a spawned task and reports failures only to the
//! log and the chat. Those tasks are tracked so shutdown waits for them.
//! `GET /set_webhook` is the one-off registration call an operator hits after
//! each deployment.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    routing::{get, post},
    Json,
};
use serde::{Deserialize, Serialize};
use teloxide::types::Update;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::bot::Router;
use crate::platform::IncomingMessage;

/// Body of every `POST /` response.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum WebhookAck {
    Ok,
    Error { message: String },
}

/// How long shutdown waits for updates that are still being handled.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Dispatch tasks spawned by `POST /` that may still be running.
#[derive(Clone, Default)]
pub struct InFlight(Arc<Mutex<JoinSet<()>>>);

impl InFlight {
    fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.lock();
        // Reap what already finished so the set only holds running tasks
        while tasks.try_join_next().is_some() {}
        tasks.spawn(task);
    }

    fn lock(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait up to `limit` for every tracked task. Returns `false` when some
    /// were still running; those are aborted.
    pub async fn drain(&self, limit: Duration) -> bool {
        let mut tasks = std::mem::take(&mut *self.lock());
        if tasks.is_empty() {
            return true;
        }

        info!(pending = tasks.len(), "Waiting for in-flight updates");
        let finished = tokio::time::timeout(limit, async {
            while tasks.join_next().await.is_some() {}
        })
        .await
        .is_ok();

        if !finished {
            warn!(
                aborted = tasks.len(),
                "In-flight updates did not finish within {:?}", limit
            );
        }
        finished
    }
}

#[derive(Clone)]
struct AppState {
    router: Arc<Router>,
    in_flight: InFlight,
}

pub fn app(router: Arc<Router>, in_flight: InFlight) -> axum::Router {
    axum::Router::new()
        .route("/", post(handle_update))
        .route("/set_webhook", get(set_webhook))
        .route("/health", get(health))
        .with_state(AppState { router, in_flight })
}

async fn handle_update(State(state): State<AppState>, body: Bytes) -> Json<WebhookAck> {
    let update: Update = match serde_json::from_slice(&body) {
        Ok(update) => update,
        Err(e) => {
            warn!(bytes = body.len(), "Dropping malformed update: {}", e);
            return Json(WebhookAck::Error {
                message: e.to_string(),
            });
        }
    };

    let Some(msg) = IncomingMessage::from_update(&update) else {
        debug!("Update {:?} carries no message, ignoring", update.id);
        return Json(WebhookAck::Ok);
    };

    // Telegram gets its answer now; the reply to the chat happens afterwards.
    let router = state.router;
    state.in_flight.spawn(async move {
        let chat_id = msg.chat_id;
        if let Err(e) = router.dispatch(msg).await {
            error!(chat_id, "Failed to handle update: {:#}", e);
        }
    });

    Json(WebhookAck::Ok)
}

async fn set_webhook(State(state): State<AppState>) -> String {
    match state.router.register_webhook().await {
        Ok(url) => format!("Webhook set successfully to: {}", url),
        Err(e) => {
            error!("Error setting webhook: {:#}", e);
            format!("Error setting webhook: {:#}", e)
        }
    }
}

async fn health() -> &'static str {
    "ok"
}

/// Serve the webhook on `addr` until ctrl-c, then wait for updates still
/// being handled.
pub async fn serve(addr: SocketAddr, router: Arc<Router>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    info!("Webhook server listening on {}", listener.local_addr()?);

    let in_flight = InFlight::default();
    axum::serve(listener, app(router, in_flight.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    in_flight.drain(DRAIN_TIMEOUT).await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down webhook server");
}

use crate::captures;
use crate::common::{Caption, CaptionedCapture, CaptureEvent};
use crate::error::RelayError;
use crate::pipeline::StatusBoard;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Notification sent by the captioning stage when a capture has been
/// described. Without an `image_path` the newest capture under the
/// configured root is used.
#[derive(Debug, Deserialize)]
pub struct EventNotification {
    pub image_path: Option<PathBuf>,
    pub caption: String,
    pub pose: Option<serde_json::Value>,
}

#[derive(Clone)]
pub struct AppState {
    pub event_tx: mpsc::Sender<CaptionedCapture>,
    pub status: Arc<StatusBoard>,
    pub captures_root: PathBuf,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/events", post(submit_event))
        .route("/health", get(health))
        .route("/status", get(status))
        .with_state(state)
}

/// Bind and serve until the token is cancelled. Liveness never depends on
/// any downstream service: intake only enqueues work.
pub async fn serve(
    addr: String,
    state: AppState,
    cancel: CancellationToken,
) -> Result<(), RelayError> {
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|source| RelayError::Bind {
            addr: addr.clone(),
            source,
        })?;
    info!(addr, "intake listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .map_err(|e| RelayError::Intake(e.to_string()))
}

async fn submit_event(
    State(state): State<AppState>,
    Json(notification): Json<EventNotification>,
) -> impl IntoResponse {
    let image_path = match notification.image_path {
        Some(path) => path,
        None => match captures::latest_capture(&state.captures_root) {
            Some(path) => path,
            None => {
                warn!(root = %state.captures_root.display(), "no capture found");
                return (
                    StatusCode::NOT_FOUND,
                    Json(json!({
                        "ok": false,
                        "error": format!("no capture found under {}", state.captures_root.display()),
                    })),
                );
            }
        },
    };

    let mut event = CaptureEvent::new(image_path);
    event.pose = notification.pose;
    let id = event.id;
    let image_path = event.image_path.clone();
    let capture = CaptionedCapture {
        event,
        caption: Caption::new(notification.caption),
    };

    // backpressure: a full queue is the caller's signal to slow down, not
    // a reason to block intake
    if let Err(e) = state.event_tx.try_send(capture) {
        warn!(event = %id, error = %e, "event queue full, rejecting");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"ok": false, "error": "event queue full"})),
        );
    }

    info!(event = %id, image = %image_path.display(), "event accepted");
    (
        StatusCode::ACCEPTED,
        Json(json!({
            "ok": true,
            "id": id,
            "image_path": image_path,
        })),
    )
}

async fn health() -> impl IntoResponse {
    Json(json!({"ok": true, "time": chrono::Utc::now().timestamp()}))
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.status.snapshot().await)
}

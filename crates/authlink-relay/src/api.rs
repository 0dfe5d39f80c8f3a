use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::collections::HashMap;
use tokio::time::Duration;
use tracing::debug;

use crate::mailbox::{ChannelMap, Mailbox, MailboxError, Message};

#[derive(Clone)]
pub struct AppState {
    pub channels: ChannelMap,
    pub config: crate::config::ServerConfig,
    pub shutdown: tokio::sync::watch::Receiver<bool>,
}

/// Channel ids are the 32-byte tokens minted by the client, hex encoded.
/// Mixed-case spellings collapse to one mailbox.
fn canonical_channel_id(raw: &str) -> Result<String, Response> {
    let bytes = match hex::decode(raw) {
        Ok(bytes) => bytes,
        Err(_) => return Err((StatusCode::BAD_REQUEST, "bad channel id hex").into_response()),
    };

    if bytes.len() != 32 {
        return Err((StatusCode::BAD_REQUEST, "channel id must be 32 bytes").into_response());
    }

    Ok(hex::encode(bytes))
}

fn pop_message(channels: &ChannelMap, id: &str) -> Option<Message> {
    channels
        .get_mut(id)
        .and_then(|mut entry| entry.value_mut().get())
}

// POST /v1/channel/{id}
pub async fn post_channel(
    State(state): State<AppState>,
    Path(id_hex): Path<String>,
    body: Bytes,
) -> Response {
    let id = match canonical_channel_id(&id_hex) {
        Ok(id) => id,
        Err(response) => return response,
    };

    let result = {
        let mut entry = state.channels.entry(id.clone()).or_insert_with(Mailbox::new);
        entry.value_mut().post(
            body,
            state.config.max_queue_length,
            state.config.max_message_size,
        )
    };

    match result {
        Ok(sequence) => {
            debug!("channel {} queued message {}", id, sequence);
            (StatusCode::ACCEPTED, "ok").into_response()
        }
        Err(MailboxError::MessageTooLarge) => {
            (StatusCode::PAYLOAD_TOO_LARGE, "message too large").into_response()
        }
        Err(MailboxError::QueueFull) => {
            (StatusCode::INSUFFICIENT_STORAGE, "queue full").into_response()
        }
    }
}

// GET /v1/channel/{id}?wait_ms=25000
pub async fn get_channel(
    State(state): State<AppState>,
    Path(id_hex): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if *state.shutdown.borrow() {
        return (StatusCode::SERVICE_UNAVAILABLE, "server shutting down").into_response();
    }

    let wait_ms: u64 = params
        .get("wait_ms")
        .and_then(|s| s.parse().ok())
        .unwrap_or(25_000)
        .min(60_000);

    let id = match canonical_channel_id(&id_hex) {
        Ok(id) => id,
        Err(response) => return response,
    };

    let notify = {
        let entry = state
            .channels
            .entry(id.clone())
            .or_insert_with(Mailbox::new);
        entry.value().notify()
    };

    let deadline = tokio::time::sleep(Duration::from_millis(wait_ms));
    tokio::pin!(deadline);
    let mut shutdown = state.shutdown.clone();

    // Arm the notification before each queue check. `notify_waiters`
    // only reaches armed waiters, so a post landing between the check
    // and the select would otherwise sleep out the full wait.
    loop {
        let notified = notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if let Some(message) = pop_message(&state.channels, &id) {
            return (StatusCode::OK, message.data).into_response();
        }

        tokio::select! {
            _ = notified => {}
            _ = &mut deadline => {
                return (StatusCode::NO_CONTENT, Bytes::new()).into_response();
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return (StatusCode::SERVICE_UNAVAILABLE, "server shutting down").into_response();
                }
            }
        }
    }
}

// GET /health
pub async fn get_health(State(state): State<AppState>) -> Response {
    use serde_json::json;

    let response = json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "active_channels": state.channels.len(),
    });

    (StatusCode::OK, axum::Json(response)).into_response()
}

//! Relay webhook and health endpoints.
//!
//! The relay webhook is kept fast: it only
//! 1. Pulls the raw email out of the first event of the batch
//! 2. Rewrites the sender
//! 3. Publishes to the Relay Queue
//! 4. Returns 200 without waiting for delivery

use axum::{body::Bytes, extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::message::RelayMessage;
use crate::sparkpost::RelayEvent;
use crate::web::AppState;

// =============================================================================
// Health Check
// =============================================================================

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// =============================================================================
// Relay Webhook
// =============================================================================

/// Why a relay webhook body was rejected.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("body is not a JSON array of relay events: {0}")]
    NotABatch(#[source] serde_json::Error),

    #[error("relay batch is empty")]
    Empty,

    #[error("first relay event has no email_rfc822 content: {0}")]
    MissingContent(#[source] serde_json::Error),
}

/// Raw email of the first event in a relay batch, plus the batch size.
///
/// Only the first event is relayed; the rest of the batch is not inspected.
pub fn first_relay_email(body: &[u8]) -> Result<(String, usize), PayloadError> {
    let events: Vec<serde_json::Value> =
        serde_json::from_slice(body).map_err(PayloadError::NotABatch)?;
    let batch_size = events.len();

    let first = events.into_iter().next().ok_or(PayloadError::Empty)?;
    let event: RelayEvent = serde_json::from_value(first).map_err(PayloadError::MissingContent)?;

    Ok((event.msys.relay_message.content.email_rfc822, batch_size))
}

/// SparkPost relay webhook endpoint (`POST /message`).
pub async fn relay_webhook(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    let (raw_email, batch_size) = match first_relay_email(&body) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(error = %e, body_length = body.len(), "relay_webhook_invalid");
            return (StatusCode::BAD_REQUEST, "Invalid data");
        }
    };

    if batch_size > 1 {
        warn!(
            batch_size = batch_size,
            ignored = batch_size - 1,
            "relay_events_ignored"
        );
    }

    let message = RelayMessage::rewrite(&raw_email, &state.config.forward_from);

    info!(
        raw_length = raw_email.len(),
        message_length = message.len(),
        "relay_webhook_received"
    );

    if let Err(e) = state.publisher.publish(&message).await {
        // Non-200 makes SparkPost redeliver the webhook later.
        error!(error = %e, "relay_publish_failed");
        return (StatusCode::INTERNAL_SERVER_ERROR, "Queue unavailable");
    }

    info!("relay_message_enqueued");

    (StatusCode::OK, "OK")
}

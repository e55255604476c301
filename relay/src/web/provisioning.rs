//! Provisioning endpoints.
//!
//! Operator-facing calls that set up the SparkPost side of the relay: the
//! inbound domain and the relay webhook targeting this service's
//! `/message` endpoint. The webhook target is derived from the host the
//! request arrived on. Repeated calls create repeated registrations.

use axum::{
    body::Bytes,
    extract::{Host, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::web::AppState;

/// Body of both `POST /inbound-webhook` and `POST /inbound-domain`.
#[derive(Debug, Deserialize)]
pub struct DomainRequest {
    pub domain: String,
}

#[derive(Debug, Serialize)]
pub struct WebhookLookupResponse {
    pub app_url: String,
    pub domain: String,
}

#[derive(Debug, Serialize)]
pub struct WebhookCreatedResponse {
    pub app_url: String,
}

#[derive(Debug, Serialize)]
pub struct DomainCreatedResponse {
    pub domain: String,
}

/// Upstream failure, reported to the operator.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Malformed request body.
#[derive(Debug, Serialize)]
pub struct InvalidRequestResponse {
    pub err: &'static str,
}

fn invalid_data() -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(InvalidRequestResponse {
            err: "Invalid data",
        }),
    )
        .into_response()
}

/// Parse a `{"domain": "..."}` body; blank domains are rejected too.
fn parse_domain(body: &[u8]) -> Option<String> {
    serde_json::from_slice::<DomainRequest>(body)
        .ok()
        .map(|request| request.domain.trim().to_string())
        .filter(|domain| !domain.is_empty())
}

/// Public URL of this service's relay webhook endpoint.
///
/// Uses the request host without its port and always assumes HTTPS.
pub fn app_url(host: &str) -> String {
    let hostname = if host.starts_with('[') {
        // Bracketed IPv6 literal, optionally followed by a port.
        host.split_inclusive(']').next().unwrap_or(host)
    } else {
        host.split(':').next().unwrap_or(host)
    };

    format!("https://{}/message", hostname)
}

/// `GET /inbound-webhook`: find the relay webhook pointing at this service.
pub async fn get_inbound_webhook(State(state): State<AppState>, Host(host): Host) -> Response {
    let app_url = app_url(&host);

    let webhooks = match state.sparkpost.list_inbound_webhooks().await {
        Ok(webhooks) => webhooks,
        Err(e) => {
            error!(app_url = %app_url, error = %e, "inbound_webhook_lookup_failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
                .into_response();
        }
    };

    match webhooks.into_iter().find(|webhook| webhook.target == app_url) {
        Some(webhook) => {
            info!(app_url = %app_url, domain = %webhook.match_.domain, "inbound_webhook_found");
            Json(WebhookLookupResponse {
                app_url,
                domain: webhook.match_.domain,
            })
            .into_response()
        }
        None => {
            info!(app_url = %app_url, "inbound_webhook_not_found");
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

/// `POST /inbound-webhook`: register this service for the given domain.
pub async fn create_inbound_webhook(
    State(state): State<AppState>,
    Host(host): Host,
    body: Bytes,
) -> Response {
    let Some(domain) = parse_domain(&body) else {
        warn!(body_length = body.len(), "inbound_webhook_request_invalid");
        return invalid_data();
    };

    let app_url = app_url(&host);

    match state
        .sparkpost
        .create_inbound_webhook(&app_url, &domain)
        .await
    {
        Ok(_) => Json(WebhookCreatedResponse { app_url }).into_response(),
        Err(e) => {
            error!(app_url = %app_url, domain = %domain, error = %e, "inbound_webhook_create_failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}

/// `POST /inbound-domain`: register the given domain for inbound relay.
pub async fn create_inbound_domain(State(state): State<AppState>, body: Bytes) -> Response {
    let Some(domain) = parse_domain(&body) else {
        warn!(body_length = body.len(), "inbound_domain_request_invalid");
        return invalid_data();
    };

    match state.sparkpost.create_inbound_domain(&domain).await {
        Ok(_) => Json(DomainCreatedResponse { domain }).into_response(),
        Err(e) => {
            error!(domain = %domain, error = %e, "inbound_domain_create_failed");
            // Raw failure text, not JSON.
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

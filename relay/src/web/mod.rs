//! Web server module.
//!
//! This module provides:
//! - `POST /message`, the SparkPost relay webhook: rewrite the sender,
//!   enqueue, answer immediately
//! - The provisioning endpoints that register the inbound domain and the
//!   relay webhook pointing back at this service
//!
//! Delivery happens in the background worker; nothing here waits on it.

pub mod handlers;
pub mod provisioning;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::{services::ServeDir, trace::TraceLayer};

use crate::queue::RelayPublisher;
use crate::sparkpost::SparkPostClient;
use crate::Config;

pub use handlers::{health, relay_webhook, HealthResponse};
pub use provisioning::{create_inbound_domain, create_inbound_webhook, get_inbound_webhook};

/// Largest relay webhook body accepted, in bytes.
pub const MAX_WEBHOOK_BODY: usize = 25 * 1024 * 1024;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub publisher: Arc<dyn RelayPublisher>,
    pub sparkpost: SparkPostClient,
}

impl AppState {
    pub fn new(
        config: Config,
        publisher: Arc<dyn RelayPublisher>,
        sparkpost: SparkPostClient,
    ) -> Self {
        Self {
            config: Arc::new(config),
            publisher,
            sparkpost,
        }
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let static_dir = state.config.static_dir.clone();

    let router = Router::new()
        .route("/health", get(health))
        .route(
            "/message",
            post(relay_webhook).layer(DefaultBodyLimit::max(MAX_WEBHOOK_BODY)),
        )
        .route(
            "/inbound-webhook",
            get(get_inbound_webhook).post(create_inbound_webhook),
        )
        .route("/inbound-domain", post(create_inbound_domain));

    let router = match static_dir {
        Some(dir) => router.fallback_service(ServeDir::new(dir)),
        None => router,
    };

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

//! SparkPost integration.
//!
//! This module provides:
//! - Wire types for relay webhooks, transmissions and provisioning resources
//! - An authenticated API client used by the delivery worker and the
//!   provisioning endpoints

pub mod client;
pub mod types;

pub use client::{ApiError, SparkPostClient};
pub use types::{
    RelayEvent, RelayWebhook, TransmissionResults, WebhookMatch, WEBHOOK_NAME, WEBHOOK_PROTOCOL,
};

//! SparkPost inbound relay.
//!
//! Receives SparkPost relay webhooks, rewrites the sender of each message
//! and retransmits it to a fixed forwarding address. The `sparkpost-relay`
//! binary runs the web server and the single delivery worker in one process;
//! every subscriber of the relay exchange receives every message, so exactly
//! one worker may run per deployment.
//!
//! ## Architecture
//!
//! ```text
//! SparkPost → POST /message → Relay Queue → DeliveryWorker → SparkPost transmissions
//! ```

pub mod app;
pub mod config;
pub mod message;
pub mod queue;
pub mod sparkpost;
pub mod web;
pub mod worker;

// Re-export commonly used types
pub use config::{Config, ConfigError, QueueBackend};
pub use message::RelayMessage;
pub use queue::{InMemoryQueue, RelayPublisher, RelaySubscriber, RELAY_EXCHANGE};
pub use sparkpost::{ApiError, SparkPostClient};
pub use web::AppState;
pub use worker::{DeliveryWorker, WorkerStats};

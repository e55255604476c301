//! Relay Queue: the hand-off between webhook ingestion and delivery.
//!
//! This module provides:
//! - [`RelayPublisher`] / [`RelaySubscriber`], the two ends of the channel
//! - A RabbitMQ backend emulating a single pub/sub channel
//! - An in-process backend for tests and local runs
//!
//! ## Architecture
//!
//! ```text
//! POST /message → RelayPublisher → relay exchange → RelaySubscriber → DeliveryWorker
//! ```
//!
//! Delivery is best-effort: a message published while no subscriber is bound
//! is dropped, and nothing survives a restart.

pub mod amqp;
pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::message::RelayMessage;

pub use amqp::{AmqpPublisher, AmqpSubscriber, RELAY_EXCHANGE};
pub use memory::{InMemoryPublisher, InMemorySubscriber, InMemoryQueue};

/// Publishing end of the Relay Queue.
#[async_trait]
pub trait RelayPublisher: Send + Sync {
    /// Hand a message to the queue. Returns once the queue accepted it,
    /// never waiting for delivery.
    async fn publish(&self, message: &RelayMessage) -> Result<()>;

    /// Release the underlying connection.
    async fn close(&self) {}
}

/// Consuming end of the Relay Queue.
#[async_trait]
pub trait RelaySubscriber: Send {
    /// Next message in publish order, or `None` once the channel is closed.
    async fn next_message(&mut self) -> Option<RelayMessage>;

    /// Release the underlying connection.
    async fn close(&mut self) {}
}

#[async_trait]
impl<S: RelaySubscriber + ?Sized> RelaySubscriber for Box<S> {
    async fn next_message(&mut self) -> Option<RelayMessage> {
        (**self).next_message().await
    }

    async fn close(&mut self) {
        (**self).close().await
    }
}

//! In-process Relay Queue.
//!
//! An unbounded channel between one publisher (cloneable) and one
//! subscriber. Useful for tests and for running the web server and the
//! delivery worker together without a broker. Publish order is preserved.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::info;

use super::{RelayPublisher, RelaySubscriber};
use crate::message::RelayMessage;

/// Constructor for a connected publisher/subscriber pair.
pub struct InMemoryQueue;

impl InMemoryQueue {
    pub fn channel() -> (InMemoryPublisher, InMemorySubscriber) {
        let (tx, rx) = mpsc::unbounded_channel();
        (InMemoryPublisher { tx }, InMemorySubscriber { rx })
    }
}

/// Publishing end; clones feed the same subscriber.
#[derive(Clone)]
pub struct InMemoryPublisher {
    tx: mpsc::UnboundedSender<RelayMessage>,
}

#[async_trait]
impl RelayPublisher for InMemoryPublisher {
    async fn publish(&self, message: &RelayMessage) -> Result<()> {
        // With the subscriber gone the publish fails outright.
        self.tx
            .send(message.clone())
            .map_err(|_| anyhow!("relay subscriber has gone away"))?;

        info!(body_length = message.len(), "memory_relay_published");
        Ok(())
    }
}

/// Subscribing end.
pub struct InMemorySubscriber {
    rx: mpsc::UnboundedReceiver<RelayMessage>,
}

impl InMemorySubscriber {
    /// Take whatever is queued right now without waiting.
    pub fn drain(&mut self) -> Vec<RelayMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = self.rx.try_recv() {
            messages.push(message);
        }
        messages
    }
}

#[async_trait]
impl RelaySubscriber for InMemorySubscriber {
    async fn next_message(&mut self) -> Option<RelayMessage> {
        self.rx.recv().await
    }

    async fn close(&mut self) {
        self.rx.close();
    }
}

//! Delivery worker.
//!
//! Subscribes to the Relay Queue and retransmits every message to the
//! forwarding address through SparkPost, one message at a time in publish
//! order. A failed transmission is logged and the message dropped; nothing
//! is retried or parked.

use std::future::Future;

use tracing::{error, info, warn};

use crate::message::RelayMessage;
use crate::queue::RelaySubscriber;
use crate::sparkpost::{ApiError, SparkPostClient, TransmissionResults};

async fn transmit(
    client: &SparkPostClient,
    forward_to: &str,
    message: &RelayMessage,
) -> Result<TransmissionResults, ApiError> {
    client.send_transmission(forward_to, message.as_str()).await
}

/// Counters reported when the worker stops.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
    pub delivered: u64,
    pub failed: u64,
}

/// Consumes relay messages and sends them as SparkPost transmissions.
pub struct DeliveryWorker<S> {
    client: SparkPostClient,
    forward_to: String,
    subscriber: S,
}

impl<S: RelaySubscriber> DeliveryWorker<S> {
    pub fn new(client: SparkPostClient, forward_to: String, subscriber: S) -> Self {
        Self {
            client,
            forward_to,
            subscriber,
        }
    }

    /// Send one message to the forwarding address.
    pub async fn deliver(&self, message: &RelayMessage) -> Result<TransmissionResults, ApiError> {
        transmit(&self.client, &self.forward_to, message).await
    }

    /// Process messages until the queue closes or `shutdown` resolves.
    ///
    /// A delivery already in flight when shutdown fires is allowed to finish.
    pub async fn run<F>(mut self, shutdown: F) -> WorkerStats
    where
        F: Future<Output = ()>,
    {
        let mut stats = WorkerStats::default();

        info!(forward_to = %self.forward_to, "worker_ready");

        tokio::pin!(shutdown);

        loop {
            let message = tokio::select! {
                _ = &mut shutdown => {
                    info!("worker_stopping");
                    break;
                }
                message = self.subscriber.next_message() => message,
            };

            let Some(message) = message else {
                warn!("relay_queue_closed");
                break;
            };

            info!(body_length = message.len(), "relay_message_received");

            // Field borrows only: the subscriber need not be Sync.
            match transmit(&self.client, &self.forward_to, &message).await {
                Ok(results) => {
                    stats.delivered += 1;
                    info!(
                        transmission_id = ?results.id,
                        accepted = ?results.total_accepted_recipients,
                        rejected = ?results.total_rejected_recipients,
                        "transmission_succeeded"
                    );
                }
                Err(e) => {
                    stats.failed += 1;
                    error!(
                        status = ?e.status(),
                        error = %e,
                        "transmission_failed"
                    );
                }
            }
        }

        self.subscriber.close().await;

        info!(
            delivered = stats.delivered,
            failed = stats.failed,
            "worker_shutdown_complete"
        );

        stats
    }
}

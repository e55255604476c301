//! RabbitMQ backend for the Relay Queue.
//!
//! Messages go to a non-durable fanout exchange. Each subscriber binds its
//! own exclusive, auto-delete queue, so the exchange behaves like a single
//! pub/sub channel: with nobody bound the broker drops the message, and
//! nothing outlives the subscriber's connection.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    options::{
        BasicConsumeOptions, BasicPublishOptions, ExchangeDeclareOptions, QueueBindOptions,
        QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind,
};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use super::{RelayPublisher, RelaySubscriber};
use crate::message::RelayMessage;

/// Exchange carrying relay messages.
pub const RELAY_EXCHANGE: &str = "relay";

/// Content type stamped on every published message.
const CONTENT_TYPE: &str = "message/rfc822";

/// Consumer tag used by the delivery worker.
const CONSUMER_TAG: &str = "relay-worker";

/// Declare the relay exchange on `channel` (idempotent).
async fn declare_exchange(channel: &Channel) -> Result<()> {
    channel
        .exchange_declare(
            RELAY_EXCHANGE,
            ExchangeKind::Fanout,
            ExchangeDeclareOptions::default(),
            FieldTable::default(),
        )
        .await
        .context("Failed to declare relay exchange")?;

    info!(exchange = RELAY_EXCHANGE, "rabbitmq_exchange_declared");
    Ok(())
}

// =============================================================================
// Publisher
// =============================================================================

/// Async RabbitMQ publisher with connection management.
///
/// The publisher keeps one connection and channel for the whole process,
/// reconnecting when the channel is found closed.
#[derive(Clone)]
pub struct AmqpPublisher {
    inner: Arc<PublisherInner>,
}

struct PublisherInner {
    url: String,
    connection: RwLock<Option<Connection>>,
    channel: RwLock<Option<Channel>>,
}

impl AmqpPublisher {
    /// Create a new publisher with the given RabbitMQ URL.
    pub fn new(url: String) -> Self {
        Self {
            inner: Arc::new(PublisherInner {
                url,
                connection: RwLock::new(None),
                channel: RwLock::new(None),
            }),
        }
    }

    /// Open the connection now instead of on first publish.
    pub async fn connect(&self) -> Result<()> {
        self.ensure_connected().await.map(|_| ())
    }

    /// Ensure we have a valid connection and channel.
    async fn ensure_connected(&self) -> Result<Channel> {
        {
            let channel = self.inner.channel.read().await;
            if let Some(ch) = channel.as_ref() {
                if ch.status().connected() {
                    return Ok(ch.clone());
                }
            }
        }

        let mut connection = self.inner.connection.write().await;
        let mut channel = self.inner.channel.write().await;

        // Another task may have reconnected while we waited for the locks.
        if let Some(ch) = channel.as_ref() {
            if ch.status().connected() {
                return Ok(ch.clone());
            }
        }

        info!("rabbitmq_publisher_connecting");

        let conn = Connection::connect(&self.inner.url, ConnectionProperties::default())
            .await
            .context("Failed to connect to RabbitMQ")?;

        info!("rabbitmq_publisher_connected");

        let ch = conn
            .create_channel()
            .await
            .context("Failed to create channel")?;

        declare_exchange(&ch).await?;

        *connection = Some(conn);
        *channel = Some(ch.clone());

        Ok(ch)
    }
}

#[async_trait]
impl RelayPublisher for AmqpPublisher {
    async fn publish(&self, message: &RelayMessage) -> Result<()> {
        let channel = self.ensure_connected().await?;

        channel
            .basic_publish(
                RELAY_EXCHANGE,
                "",
                BasicPublishOptions::default(),
                message.as_str().as_bytes(),
                BasicProperties::default()
                    .with_delivery_mode(1) // Transient
                    .with_content_type(CONTENT_TYPE.into()),
            )
            .await
            .context("Failed to publish relay message")?
            .await
            .context("Failed to confirm publish")?;

        info!(
            exchange = RELAY_EXCHANGE,
            body_length = message.len(),
            "rabbitmq_relay_published"
        );

        Ok(())
    }

    async fn close(&self) {
        let mut connection = self.inner.connection.write().await;
        let mut channel = self.inner.channel.write().await;

        if let Some(ch) = channel.take() {
            if let Err(e) = ch.close(200, "Normal shutdown").await {
                warn!(error = %e, "rabbitmq_channel_close_error");
            }
        }

        if let Some(conn) = connection.take() {
            if let Err(e) = conn.close(200, "Normal shutdown").await {
                warn!(error = %e, "rabbitmq_connection_close_error");
            }
        }

        info!("rabbitmq_publisher_closed");
    }
}

// =============================================================================
// Subscriber
// =============================================================================

/// RabbitMQ subscriber bound to the relay exchange.
///
/// Consumes with automatic acknowledgement: a message is gone from the
/// broker as soon as it is handed to this process.
pub struct AmqpSubscriber {
    connection: Connection,
    consumer: Consumer,
}

impl AmqpSubscriber {
    /// Connect, bind a private queue to the relay exchange and start consuming.
    pub async fn connect(url: &str) -> Result<Self> {
        info!(url_length = url.len(), "rabbitmq_connecting");

        let connection = Connection::connect(url, ConnectionProperties::default())
            .await
            .context("Failed to connect to RabbitMQ")?;

        info!("rabbitmq_connected");

        let channel = connection
            .create_channel()
            .await
            .context("Failed to create channel")?;

        declare_exchange(&channel).await?;

        // Server-named queue that lives exactly as long as this connection.
        let queue = channel
            .queue_declare(
                "",
                QueueDeclareOptions {
                    exclusive: true,
                    auto_delete: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .context("Failed to declare subscriber queue")?;

        channel
            .queue_bind(
                queue.name().as_str(),
                RELAY_EXCHANGE,
                "",
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .context("Failed to bind subscriber queue")?;

        let consumer = channel
            .basic_consume(
                queue.name().as_str(),
                CONSUMER_TAG,
                BasicConsumeOptions {
                    no_ack: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .context("Failed to start consumer")?;

        info!(
            exchange = RELAY_EXCHANGE,
            queue = queue.name().as_str(),
            "rabbitmq_consumer_started"
        );

        Ok(Self {
            connection,
            consumer,
        })
    }
}

#[async_trait]
impl RelaySubscriber for AmqpSubscriber {
    async fn next_message(&mut self) -> Option<RelayMessage> {
        loop {
            match self.consumer.next().await {
                Some(Ok(delivery)) => {
                    let delivery_tag = delivery.delivery_tag;
                    match String::from_utf8(delivery.data) {
                        Ok(text) => return Some(RelayMessage::from_wire(text)),
                        Err(e) => {
                            // Only this service publishes here; skip anything foreign.
                            error!(
                                delivery_tag = delivery_tag,
                                error = %e,
                                "rabbitmq_message_not_utf8"
                            );
                        }
                    }
                }
                Some(Err(e)) => {
                    error!(error = %e, "rabbitmq_delivery_error");
                }
                None => {
                    warn!("rabbitmq_consumer_closed");
                    return None;
                }
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.connection.close(200, "Normal shutdown").await {
            warn!(error = %e, "rabbitmq_connection_close_error");
        }

        info!("rabbitmq_subscriber_closed");
    }
}

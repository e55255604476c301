//! Process wiring shared by the binaries.
//!
//! Logging setup, the shutdown signal, and construction of the long-lived
//! dependencies (SparkPost client, queue connections) that are created once
//! at startup and handed to the web server and the worker.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::{signal, sync::watch, task::JoinHandle};
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{Config, QueueBackend};
use crate::queue::{
    AmqpPublisher, AmqpSubscriber, InMemoryQueue, RelayPublisher, RelaySubscriber,
};
use crate::sparkpost::SparkPostClient;
use crate::worker::{DeliveryWorker, WorkerStats};

/// Initialize structured JSON logging.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();
}

/// Build the SparkPost client described by `config`.
pub fn sparkpost_client(config: &Config) -> Result<SparkPostClient> {
    let client = SparkPostClient::new(
        &config.sparkpost_api_url,
        &config.sparkpost_api_key,
        config.provider_timeout,
    )?
    .with_webhook_auth_token(config.webhook_auth_token.clone());

    info!(base_url = %client.base_url(), "sparkpost_client_created");
    Ok(client)
}

/// Open both ends of the Relay Queue.
pub async fn connect_queue(
    config: &Config,
) -> Result<(Arc<dyn RelayPublisher>, Box<dyn RelaySubscriber>)> {
    match config.queue_backend {
        QueueBackend::Amqp => {
            // Subscribe first so nothing published during startup is dropped.
            let subscriber = AmqpSubscriber::connect(&config.cloudamqp_url).await?;
            let publisher = AmqpPublisher::new(config.cloudamqp_url.clone());
            publisher.connect().await?;

            let publisher: Arc<dyn RelayPublisher> = Arc::new(publisher);
            let subscriber: Box<dyn RelaySubscriber> = Box::new(subscriber);
            Ok((publisher, subscriber))
        }
        QueueBackend::Memory => {
            let (publisher, subscriber) = InMemoryQueue::channel();
            info!("memory_queue_created");

            let publisher: Arc<dyn RelayPublisher> = Arc::new(publisher);
            let subscriber: Box<dyn RelaySubscriber> = Box::new(subscriber);
            Ok((publisher, subscriber))
        }
    }
}

/// Broadcast handle for stopping the web server and the worker together.
#[derive(Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once [`trigger`](Self::trigger) has been called.
    pub async fn wait(mut self) {
        let _ = self.rx.wait_for(|stopped| *stopped).await;
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Run the delivery worker on its own task until `shutdown` fires.
pub fn spawn_worker<S>(
    client: SparkPostClient,
    forward_to: String,
    subscriber: S,
    shutdown: Shutdown,
) -> JoinHandle<WorkerStats>
where
    S: RelaySubscriber + 'static,
{
    let worker = DeliveryWorker::new(client, forward_to, subscriber);
    tokio::spawn(worker.run(shutdown.wait()))
}

/// Wait for the web server and the worker, stopping both when either ends.
///
/// The worker ending before shutdown was requested is an error: the server
/// would otherwise keep accepting messages that nobody consumes.
pub async fn run_until_stopped<E>(
    mut server: JoinHandle<std::result::Result<(), E>>,
    mut worker: JoinHandle<WorkerStats>,
    shutdown: Shutdown,
) -> Result<()>
where
    E: std::error::Error + Send + Sync + 'static,
{
    let (served, stopped, worker_lost) = tokio::select! {
        served = &mut server => {
            shutdown.trigger();
            (served, worker.await, false)
        }
        stopped = &mut worker => {
            let worker_lost = !shutdown.is_triggered();
            if worker_lost {
                error!("worker_exited_unexpectedly");
            }
            shutdown.trigger();
            (server.await, stopped, worker_lost)
        }
    };

    match stopped {
        Ok(stats) => info!(
            delivered = stats.delivered,
            failed = stats.failed,
            "worker_stopped"
        ),
        Err(e) => error!(error = %e, "worker_task_failed"),
    }

    served.context("Server task failed")?.context("Server error")?;

    if worker_lost {
        bail!("Delivery worker stopped before shutdown was requested");
    }
    Ok(())
}

/// Create a future that completes when a shutdown signal is received.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_shutdown_wakes_all_waiters() {
        let shutdown = Shutdown::new();
        let a = tokio::spawn(shutdown.clone().wait());
        let b = tokio::spawn(shutdown.clone().wait());

        shutdown.trigger();

        tokio::time::timeout(Duration::from_secs(1), async {
            a.await.unwrap();
            b.await.unwrap();
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_after_trigger_resolves_immediately() {
        let shutdown = Shutdown::new();
        shutdown.trigger();

        tokio::time::timeout(Duration::from_secs(1), shutdown.wait())
            .await
            .unwrap();
    }

    fn idle_client() -> SparkPostClient {
        SparkPostClient::new("http://127.0.0.1:9/api/v1", "key", None).unwrap()
    }

    fn server_until(shutdown: Shutdown) -> JoinHandle<std::io::Result<()>> {
        tokio::spawn(async move {
            shutdown.wait().await;
            Ok(())
        })
    }

    #[tokio::test]
    async fn test_worker_exit_stops_server_with_error() {
        let shutdown = Shutdown::new();
        let (publisher, subscriber) = InMemoryQueue::channel();
        let worker = spawn_worker(
            idle_client(),
            "me@example.com".to_string(),
            subscriber,
            shutdown.clone(),
        );
        let server = server_until(shutdown.clone());

        // Closing the queue ends the worker without any shutdown request.
        drop(publisher);

        let result = tokio::time::timeout(
            Duration::from_secs(1),
            run_until_stopped(server, worker, shutdown.clone()),
        )
        .await
        .unwrap();

        assert!(result.is_err());
        assert!(shutdown.is_triggered());
    }

    #[tokio::test]
    async fn test_requested_shutdown_stops_both_cleanly() {
        let shutdown = Shutdown::new();
        let (_publisher, subscriber) = InMemoryQueue::channel();
        let worker = spawn_worker(
            idle_client(),
            "me@example.com".to_string(),
            subscriber,
            shutdown.clone(),
        );
        let server = server_until(shutdown.clone());

        shutdown.trigger();

        let result = tokio::time::timeout(
            Duration::from_secs(1),
            run_until_stopped(server, worker, shutdown),
        )
        .await
        .unwrap();

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_server_failure_stops_worker() {
        let shutdown = Shutdown::new();
        let (_publisher, subscriber) = InMemoryQueue::channel();
        let worker = spawn_worker(
            idle_client(),
            "me@example.com".to_string(),
            subscriber,
            shutdown.clone(),
        );
        let server = tokio::spawn(async {
            Err::<(), _>(std::io::Error::new(std::io::ErrorKind::AddrInUse, "port taken"))
        });

        let result = tokio::time::timeout(
            Duration::from_secs(1),
            run_until_stopped(server, worker, shutdown.clone()),
        )
        .await
        .unwrap();

        assert!(result.is_err());
        assert!(shutdown.is_triggered());
    }
}

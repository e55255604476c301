//! SparkPost Relay - webhook receiver and delivery worker in one process.
//!
//! The web server answers SparkPost's relay webhooks as soon as the message
//! is on the Relay Queue; the embedded worker forwards queued messages in
//! the background. Both stop together on SIGINT/SIGTERM, and if either one
//! ends early the other is stopped and the process exits with an error.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{error, info};

use relay::app::{self, Shutdown};
use relay::web::{self, AppState};
use relay::Config;

#[tokio::main]
async fn main() -> Result<()> {
    app::init_tracing();

    info!("relay_starting");

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "config_invalid");
            return Err(e).context("Invalid configuration");
        }
    };
    info!(
        port = config.port,
        queue_backend = ?config.queue_backend,
        forward_to = %config.forward_to,
        forward_from = %config.forward_from,
        webhook_auth_token_set = config.webhook_auth_token.is_some(),
        static_dir = ?config.static_dir,
        "config_loaded"
    );

    let sparkpost = app::sparkpost_client(&config)?;
    let (publisher, subscriber) = app::connect_queue(&config).await?;

    let shutdown = Shutdown::new();
    let worker = app::spawn_worker(
        sparkpost.clone(),
        config.forward_to.clone(),
        subscriber,
        shutdown.clone(),
    );

    let port = config.port;
    let state = AppState::new(config, publisher.clone(), sparkpost);
    let router = web::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "web_server_listening");

    let signal = shutdown.clone();
    tokio::spawn(async move {
        app::shutdown_signal().await;
        signal.trigger();
    });

    let stop = shutdown.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(stop.wait())
            .await
    });

    // A worker that stops on its own fails the process so it gets restarted.
    let outcome = app::run_until_stopped(server, worker, shutdown).await;

    publisher.close().await;

    info!("relay_shutdown_complete");

    outcome
}

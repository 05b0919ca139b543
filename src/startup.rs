//! Wire the service together and run it until a shutdown signal is received.
use crate::amqp::{BrokerChannel, BrokerConnection};
use crate::configuration::Settings;
use crate::consumers::Consumer;
use crate::metrics::PrometheusMetrics;
use crate::metrics_server::MetricsServer;
use crate::processing::{LoggingHandler, MessageService};
use anyhow::Context;
use prometheus::Registry;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How long the service waits for the metrics server and the consumer to stop, in total.
pub const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(10);

pub const METRICS_NAMESPACE: &str = "queue_consumer";
pub const METRICS_SUBSYSTEM: &str = "rabbitmq";

/// Connect to the broker, start consuming and wait for `shutdown` to resolve.
///
/// Startup failures are returned. Once `shutdown` resolves, the metrics server and the
/// consumer are stopped within [`SHUTDOWN_DEADLINE`]: shutdown failures are logged, not
/// returned.
pub async fn run_until_shutdown(
    settings: Settings,
    shutdown: impl Future<Output = ()>,
) -> Result<(), anyhow::Error> {
    let connection = BrokerConnection::open(&settings.rabbitmq).await?;
    run_on_channel(connection, &settings, shutdown).await
}

/// [`run_until_shutdown`] on top of a channel that is already open.
///
/// The channel is closed and the metrics server, if any, is stopped on every exit path.
pub async fn run_on_channel(
    channel: impl BrokerChannel,
    settings: &Settings,
    shutdown: impl Future<Output = ()>,
) -> Result<(), anyhow::Error> {
    let registry = Arc::new(Registry::new());
    let metrics = match PrometheusMetrics::new(&registry, METRICS_NAMESPACE, METRICS_SUBSYSTEM) {
        Ok(metrics) => metrics,
        Err(e) => {
            close(&channel).await;
            return Err(e).context("Failed to register the consumer metrics");
        }
    };

    // Built before the metrics server: a channel it rejects is already closed.
    let consumer = Consumer::new(
        channel,
        settings.rabbitmq.routing.clone(),
        LoggingHandler::new(MessageService),
        Arc::new(metrics),
    )?;

    let metrics_server = match &settings.metrics {
        Some(metrics_settings) => {
            match MetricsServer::start(metrics_settings, registry.clone()).await {
                Ok(server) => Some(server),
                Err(e) => {
                    if let Err(stop_error) = consumer.stop(SHUTDOWN_DEADLINE).await {
                        tracing::warn!(error = ?stop_error, "Failed to stop the consumer");
                    }
                    return Err(e);
                }
            }
        }
        None => None,
    };

    if let Err(e) = consumer.start().await {
        stop_metrics_server(metrics_server, SHUTDOWN_DEADLINE).await;
        return Err(e.into());
    }
    tracing::info!(
        queue_name = %consumer.routing().queue(),
        exchange = %consumer.routing().exchange(),
        "Consumer started"
    );

    shutdown.await;
    tracing::info!("Shutdown signal received, stopping");

    let started = Instant::now();
    stop_metrics_server(metrics_server, SHUTDOWN_DEADLINE).await;
    let remaining = SHUTDOWN_DEADLINE.saturating_sub(started.elapsed());
    if let Err(e) = consumer.stop(remaining).await {
        tracing::error!(error = ?e, "Failed to stop the consumer");
    }
    tracing::info!("Shutdown complete");

    Ok(())
}

async fn stop_metrics_server(server: Option<MetricsServer>, deadline: Duration) {
    if let Some(server) = server {
        if let Err(e) = server.shutdown(deadline).await {
            tracing::error!(error = ?e, "Failed to stop the metrics server");
        }
    }
}

async fn close(channel: &impl BrokerChannel) {
    if let Err(e) = channel.close().await {
        tracing::warn!(error = ?e, "Failed to close the RabbitMQ channel");
    }
}

/// Resolves on SIGINT (Ctrl+C) or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

use anyhow::Context;
use queue_consumer::configuration::Settings;
use queue_consumer::startup::{run_until_shutdown, shutdown_signal};
use queue_consumer::telemetry::init_subscriber;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let settings = Settings::from_env().context("Invalid configuration")?;
    let _guard = init_subscriber(settings.log_level, settings.log_dir.as_deref())?;
    tracing::info!(
        queue_name = %settings.rabbitmq.routing.queue(),
        exchange = %settings.rabbitmq.routing.exchange(),
        log_level = %settings.log_level,
        metrics_enabled = settings.metrics.is_some(),
        "Starting queue consumer"
    );

    if let Err(e) = run_until_shutdown(settings, shutdown_signal()).await {
        tracing::error!(error = ?e, "Queue consumer failed to start");
        return Err(e);
    }
    Ok(())
}

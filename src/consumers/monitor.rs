use crate::amqp::BrokerChannel;
use crate::metrics::MetricsSink;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Periodically inspects the depth of the consumed queue and records it as a gauge.
///
/// Inspection failures are logged and skipped: the monitor tries again on the next tick.
pub(super) struct QueueDepthMonitor {
    pub(super) channel: Arc<dyn BrokerChannel>,
    pub(super) queue_name: String,
    pub(super) metrics: Arc<dyn MetricsSink>,
    pub(super) interval: Duration,
}

impl QueueDepthMonitor {
    #[tracing::instrument(skip_all, name = "queue_depth_monitor", fields(queue_name = %self.queue_name))]
    pub(super) async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => self.inspect().await,
            }
        }
        tracing::debug!("Queue depth monitor stopped");
    }

    async fn inspect(&self) {
        match self.channel.queue_depth(&self.queue_name).await {
            Ok(depth) => self.metrics.set_queue_depth(f64::from(depth)),
            Err(e) => tracing::warn!(error = ?e, "Failed to inspect queue depth"),
        }
    }
}

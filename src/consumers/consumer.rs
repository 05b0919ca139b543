use crate::amqp::configuration::RoutingConfig;
use crate::amqp::{BrokerChannel, DeliveryStream};
use crate::configuration::ConfigurationError;
use crate::consumers::error::{ShutdownError, StartError};
use crate::consumers::hooks::pre_start::direct_exchange_topology;
use crate::consumers::incoming_message::{BrokerAction, Delivery};
use crate::consumers::monitor::QueueDepthMonitor;
use crate::consumers::{ConsumerPreStartHook, MessageHandler};
use crate::metrics::MetricsSink;
use futures_util::StreamExt;
use lapin::options::BasicConsumeOptions;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

/// How often the queue depth is inspected, in addition to the inspections performed
/// around each message.
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(15);

/// How long [`Consumer::stop`] waits for the broker to close the channel once its deadline
/// has been exceeded.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// The lifecycle of a [`Consumer`].
///
/// `Created → Starting → Running → Stopping → Stopped`. There is no way back from
/// `Stopped`: build a new consumer to consume again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for ConsumerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            Self::Created => "created",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        f.write_str(state)
    }
}

/// A RabbitMq consumer pulling messages from a single queue, one at a time.
///
/// `Consumer` declares its topology (a durable direct exchange, a durable queue and a binding
/// keyed by the queue name), hands the payload of each delivery to a [`MessageHandler`] and
/// acks or requeues the delivery according to the outcome.
///
/// The consumer owns two background tasks while running:
/// - the consume loop, processing deliveries strictly in order;
/// - a monitor recording the queue depth every [`DEFAULT_MONITOR_INTERVAL`].
///
/// Both are stopped by [`Consumer::stop`].
pub struct Consumer {
    /// An open channel to communicate with RabbitMq, exclusively owned by this consumer.
    channel: Arc<dyn BrokerChannel>,
    routing: RoutingConfig,
    /// `handler` determines what processing will be run on each incoming message.
    handler: Arc<dyn MessageHandler>,
    metrics: Arc<dyn MetricsSink>,
    monitor_interval: Duration,
    state: Mutex<ConsumerState>,
    /// Fired by [`Consumer::stop`], observed by both background tasks.
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl Consumer {
    /// Configure a new consumer on top of an open channel.
    ///
    /// No call is made to the broker: use [`Consumer::start`] to declare the topology and
    /// start consuming.
    pub fn new(
        channel: impl BrokerChannel,
        routing: RoutingConfig,
        handler: impl MessageHandler,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self, ConfigurationError> {
        if !channel.is_open() {
            return Err(ConfigurationError::ChannelNotOpen);
        }
        Ok(Self {
            channel: Arc::new(channel),
            routing,
            handler: Arc::new(handler),
            metrics,
            monitor_interval: DEFAULT_MONITOR_INTERVAL,
            state: Mutex::new(ConsumerState::Created),
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        })
    }

    /// Override how often the queue depth monitor inspects the queue.
    #[must_use]
    pub fn with_monitor_interval(mut self, interval: Duration) -> Self {
        // `tokio::time::interval` does not accept a zero period.
        self.monitor_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn state(&self) -> ConsumerState {
        *self.lock_state()
    }

    pub fn routing(&self) -> &RoutingConfig {
        &self.routing
    }

    /// Declare the topology, subscribe to the queue and launch the background tasks.
    ///
    /// `start` returns as soon as the consume loop has been launched: it does not wait for
    /// messages. Background tasks are only launched once every step that can fail has
    /// succeeded. On failure the channel is closed and the consumer is `Stopped`.
    #[tracing::instrument(skip_all, name = "consumer_start", fields(queue_name = %self.routing.queue()))]
    pub async fn start(&self) -> Result<(), StartError> {
        self.transition(&[ConsumerState::Created], ConsumerState::Starting)
            .map_err(StartError::InvalidState)?;

        let deliveries = match self.subscribe().await {
            Ok(deliveries) => deliveries,
            Err(e) => {
                tracing::error!(error = ?e, "Failed to start consumer");
                self.set_state(ConsumerState::Stopped);
                if let Err(close_error) = self.channel.close().await {
                    tracing::warn!(error = ?close_error, "Failed to close the broker channel");
                }
                return Err(e);
            }
        };

        // `stop` may have been called while we were talking to the broker.
        self.transition(&[ConsumerState::Starting], ConsumerState::Running)
            .map_err(StartError::InvalidState)?;

        let monitor = QueueDepthMonitor {
            channel: self.channel.clone(),
            queue_name: self.routing.queue().to_owned(),
            metrics: self.metrics.clone(),
            interval: self.monitor_interval,
        };
        self.tasks.spawn(monitor.run(self.shutdown.clone()));

        let consume_loop = ConsumeLoop {
            channel: self.channel.clone(),
            queue_name: self.routing.queue().to_owned(),
            consumer_tag: deliveries.consumer_tag,
            handler: self.handler.clone(),
            metrics: self.metrics.clone(),
        };
        self.tasks
            .spawn(consume_loop.run(deliveries.stream, self.shutdown.clone()));

        Ok(())
    }

    async fn subscribe(&self) -> Result<Subscription, StartError> {
        let queue = self.routing.queue();
        direct_exchange_topology(&self.routing)
            .run(self.channel.as_ref(), queue)
            .await
            .map_err(|source| StartError::Topology {
                queue: queue.to_owned(),
                source,
            })?;
        tracing::debug!(exchange = %self.routing.exchange(), "Topology declared");

        let consumer_tag = Uuid::new_v4().to_string();
        let stream = self
            .channel
            .basic_consume(
                queue,
                &consumer_tag,
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: false,
                    exclusive: false,
                    nowait: false,
                },
            )
            .await
            .map_err(|source| StartError::Subscription {
                queue: queue.to_owned(),
                source,
            })?;

        Ok(Subscription {
            consumer_tag,
            stream,
        })
    }

    /// Stop consuming and close the channel, waiting at most `deadline`.
    ///
    /// Both background tasks are signalled to stop. A message that is being processed when
    /// `stop` is called is not interrupted: it is allowed to complete and be acked/nacked
    /// before the channel is closed, as long as this happens within `deadline`.
    ///
    /// Once `deadline` has passed the channel is closed anyway (waiting at most
    /// [`CLOSE_TIMEOUT`] for the broker) and [`ShutdownError::DeadlineExceeded`] is returned.
    /// A delivery still being processed at that point is requeued by the broker.
    ///
    /// Stopping a consumer that is already stopping or stopped is a no-op.
    #[tracing::instrument(skip_all, name = "consumer_stop", fields(queue_name = %self.routing.queue()))]
    pub async fn stop(&self, deadline: Duration) -> Result<(), ShutdownError> {
        if self
            .transition(
                &[
                    ConsumerState::Created,
                    ConsumerState::Starting,
                    ConsumerState::Running,
                ],
                ConsumerState::Stopping,
            )
            .is_err()
        {
            return Ok(());
        }

        self.shutdown.cancel();
        self.tasks.close();
        let outcome = tokio::time::timeout(deadline, async {
            self.tasks.wait().await;
            self.channel.close().await
        })
        .await;

        let result = match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ShutdownError::Close(e)),
            Err(_) => {
                tracing::warn!(
                    ?deadline,
                    "Consumer did not drain within the deadline, closing the channel"
                );
                match tokio::time::timeout(CLOSE_TIMEOUT, self.channel.close()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::error!(error = ?e, "Failed to close the broker channel"),
                    Err(_) => tracing::error!("Timed out while closing the broker channel"),
                }
                Err(ShutdownError::DeadlineExceeded(deadline))
            }
        };
        self.set_state(ConsumerState::Stopped);
        result
    }

    fn lock_state(&self) -> MutexGuard<'_, ConsumerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move to `to` if the current state is one of `from`.
    /// Returns the current state otherwise.
    fn transition(&self, from: &[ConsumerState], to: ConsumerState) -> Result<(), ConsumerState> {
        let mut state = self.lock_state();
        let current = *state;
        if !from.contains(&current) {
            return Err(current);
        }
        *state = to;
        drop(state);
        tracing::info!(from = %current, to = %to, "Consumer state transition");
        Ok(())
    }

    fn set_state(&self, to: ConsumerState) {
        let current = std::mem::replace(&mut *self.lock_state(), to);
        tracing::info!(from = %current, to = %to, "Consumer state transition");
    }
}

struct Subscription {
    consumer_tag: String,
    stream: DeliveryStream,
}

/// Everything the consume loop needs, detached from the [`Consumer`] so that it can run
/// as a background task.
struct ConsumeLoop {
    channel: Arc<dyn BrokerChannel>,
    queue_name: String,
    consumer_tag: String,
    handler: Arc<dyn MessageHandler>,
    metrics: Arc<dyn MetricsSink>,
}

impl ConsumeLoop {
    #[tracing::instrument(skip_all, name = "consumer_run", fields(queue_name = %self.queue_name))]
    async fn run(self, mut deliveries: DeliveryStream, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                // we want to poll in the specified order - preferring the handling of shutdowns before
                // going on with processing more events
                biased;

                _ = shutdown.cancelled() => {
                    tracing::info!("Consumer received shutdown event");
                    if let Err(e) = self.channel.basic_cancel(&self.consumer_tag).await {
                        tracing::warn!(error = ?e, "Failed to cancel the subscription");
                    }
                    break;
                }

                event = deliveries.next() => {
                    match event {
                        None => {
                            tracing::info!("Delivery stream closed");
                            break;
                        }
                        // The stream ends right after reporting an error.
                        Some(Err(e)) => tracing::error!(error = ?e, "Consumer error"),
                        Some(Ok(delivery)) => self.process(delivery).await,
                    }
                }
            }
        }
    }

    /// Process an incoming message - handler, metrics, ack/nack against the AMQP broker.
    ///
    /// Failures are contained here: nothing is propagated to the loop.
    #[tracing::instrument(
        name = "process_message",
        skip_all,
        fields(
            delivery_tag = delivery.delivery_tag,
            message_id = delivery.message_id.as_deref(),
            redelivered = delivery.redelivered
        ),
        level = "debug"
    )]
    async fn process(&self, delivery: Delivery) {
        // The message being processed is no longer counted by the broker.
        self.record_queue_depth(1).await;
        self.metrics
            .observe_message_size_bytes(delivery.data.len() as f64);

        let started = Instant::now();
        match self.handler.handle(&delivery.data).await {
            Err(e) => {
                self.metrics.increment_failed();
                let redelivered = delivery.redelivered;
                if let Err(nack_error) = delivery.settle(BrokerAction::Nack).await {
                    tracing::error!(error = ?nack_error, "Failed to nack message");
                }
                tracing::error!(
                    error = ?e,
                    redelivered,
                    "Failed to handle message, requeued for redelivery"
                );
            }
            Ok(()) => {
                self.record_queue_depth(0).await;
                self.metrics
                    .observe_processing_seconds(started.elapsed().as_secs_f64());
                self.metrics.increment_processed();
                if let Err(ack_error) = delivery.settle(BrokerAction::Ack).await {
                    tracing::error!(error = ?ack_error, "Failed to ack message");
                }
                tracing::debug!("Message processed");
            }
        }
    }

    /// Best-effort: a failed inspection leaves the gauge untouched.
    async fn record_queue_depth(&self, in_flight: u32) {
        match self.channel.queue_depth(&self.queue_name).await {
            Ok(depth) => self
                .metrics
                .set_queue_depth(f64::from(depth.saturating_add(in_flight))),
            Err(e) => tracing::debug!(error = ?e, "Failed to inspect queue depth"),
        }
    }
}

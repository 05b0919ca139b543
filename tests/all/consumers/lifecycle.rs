use super::{consumer, routing};
use crate::helpers::{eventually, FakeBroker, PayloadHandler, Settlement};
use prometheus::Registry;
use queue_consumer::amqp::BrokerChannel;
use queue_consumer::configuration::ConfigurationError;
use queue_consumer::consumers::{
    Consumer, ConsumerState, HandlerError, MessageHandler, ShutdownError, StartError,
};
use queue_consumer::metrics::PrometheusMetrics;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;

#[tokio::test]
async fn a_consumer_cannot_be_built_on_top_of_a_closed_channel() {
    // Arrange
    let broker = FakeBroker::default();
    broker.close().await.unwrap();
    let metrics = PrometheusMetrics::new(&Registry::new(), "test", "rabbitmq").unwrap();

    // Act
    let outcome = Consumer::new(broker, routing(), PayloadHandler, Arc::new(metrics));

    // Assert
    assert!(matches!(outcome, Err(ConfigurationError::ChannelNotOpen)));
}

#[tokio::test]
async fn the_consumer_goes_through_its_lifecycle() {
    let broker = FakeBroker::default();
    let (consumer, _) = consumer(&broker, PayloadHandler);
    assert_eq!(consumer.state(), ConsumerState::Created);

    consumer.start().await.unwrap();
    assert_eq!(consumer.state(), ConsumerState::Running);

    consumer.stop(Duration::from_secs(1)).await.unwrap();
    assert_eq!(consumer.state(), ConsumerState::Stopped);
}

#[tokio::test]
async fn stopping_an_idle_consumer_closes_the_channel_within_the_deadline() {
    // Arrange
    let broker = FakeBroker::default();
    let (consumer, _) = consumer(&broker, PayloadHandler);
    consumer.start().await.unwrap();

    // Act
    let started = Instant::now();
    consumer.stop(Duration::from_secs(1)).await.unwrap();

    // Assert
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(!broker.is_open());
    assert_eq!(broker.cancelled().len(), 1);
    assert_eq!(consumer.state(), ConsumerState::Stopped);
}

#[tokio::test]
async fn stopping_twice_is_a_no_op() {
    let broker = FakeBroker::default();
    let (consumer, _) = consumer(&broker, PayloadHandler);
    consumer.start().await.unwrap();

    consumer.stop(Duration::from_secs(1)).await.unwrap();
    consumer.stop(Duration::from_secs(1)).await.unwrap();

    assert_eq!(broker.close_calls(), 1);
    assert_eq!(consumer.state(), ConsumerState::Stopped);
}

#[tokio::test]
async fn stopping_a_consumer_that_was_never_started_closes_the_channel() {
    let broker = FakeBroker::default();
    let (consumer, _) = consumer(&broker, PayloadHandler);

    consumer.stop(Duration::from_secs(1)).await.unwrap();

    assert!(!broker.is_open());
    assert_eq!(broker.consume_calls(), 0);
    assert_eq!(consumer.state(), ConsumerState::Stopped);
}

#[tokio::test]
async fn a_consumer_can_only_be_started_once() {
    let broker = FakeBroker::default();
    let (consumer, _) = consumer(&broker, PayloadHandler);
    consumer.start().await.unwrap();

    let outcome = consumer.start().await;

    assert!(matches!(
        outcome,
        Err(StartError::InvalidState(ConsumerState::Running))
    ));
    assert_eq!(broker.consume_calls(), 1);
    consumer.stop(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn a_stopped_consumer_cannot_be_restarted() {
    let broker = FakeBroker::default();
    let (consumer, _) = consumer(&broker, PayloadHandler);
    consumer.start().await.unwrap();
    consumer.stop(Duration::from_secs(1)).await.unwrap();

    let outcome = consumer.start().await;

    assert!(matches!(
        outcome,
        Err(StartError::InvalidState(ConsumerState::Stopped))
    ));
}

/// Signals when processing starts, then takes a while to complete.
#[derive(Clone, Default)]
struct SlowHandler {
    started: Arc<Notify>,
    completed: Arc<AtomicBool>,
}

#[async_trait::async_trait]
impl MessageHandler for SlowHandler {
    async fn handle(&self, _body: &[u8]) -> Result<(), HandlerError> {
        self.started.notify_one();
        tokio::time::sleep(Duration::from_millis(200)).await;
        self.completed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn stop_waits_for_the_in_flight_message_to_be_acked_before_closing_the_channel() {
    // Arrange
    let broker = FakeBroker::default();
    let handler = SlowHandler::default();
    let (consumer, metrics) = consumer(&broker, handler.clone());
    consumer.start().await.unwrap();
    let delivery_tag = broker.publish("ok-payload");
    handler.started.notified().await;

    // Act
    consumer.stop(Duration::from_secs(2)).await.unwrap();

    // Assert
    assert!(handler.completed.load(Ordering::SeqCst));
    assert_eq!(broker.settlements(), vec![Settlement::Ack(delivery_tag)]);
    assert_eq!(metrics.processed_total(), 1);
    assert!(!broker.is_open());
}

#[tokio::test]
async fn no_new_message_is_processed_once_stop_has_been_requested() {
    // Arrange
    let broker = FakeBroker::default();
    let handler = SlowHandler::default();
    let (consumer, metrics) = consumer(&broker, handler.clone());
    consumer.start().await.unwrap();
    let first = broker.publish("first");
    broker.publish("second");
    handler.started.notified().await;

    // Act
    consumer.stop(Duration::from_secs(2)).await.unwrap();

    // Assert
    assert_eq!(broker.settlements(), vec![Settlement::Ack(first)]);
    assert_eq!(metrics.processed_total(), 1);
}

/// Never completes.
struct StuckHandler(Arc<Notify>);

#[async_trait::async_trait]
impl MessageHandler for StuckHandler {
    async fn handle(&self, _body: &[u8]) -> Result<(), HandlerError> {
        self.0.notify_one();
        std::future::pending::<()>().await;
        Ok(())
    }
}

#[tokio::test]
async fn stop_gives_up_once_the_deadline_is_exceeded() {
    // Arrange
    let broker = FakeBroker::default();
    let started = Arc::new(Notify::new());
    let (consumer, _) = consumer(&broker, StuckHandler(started.clone()));
    consumer.start().await.unwrap();
    broker.publish("ok-payload");
    started.notified().await;

    // Act
    let outcome = consumer.stop(Duration::from_millis(100)).await;

    // Assert
    assert!(matches!(outcome, Err(ShutdownError::DeadlineExceeded(_))));
    assert!(broker.settlements().is_empty());
    assert_eq!(consumer.state(), ConsumerState::Stopped);
    // The channel is closed even though the handler never completed.
    assert!(!broker.is_open());
    assert_eq!(broker.close_calls(), 1);
}

#[tokio::test]
async fn the_consume_loop_exits_when_the_broker_closes_the_stream() {
    // Arrange
    let broker = FakeBroker::default();
    let (consumer, metrics) = consumer(&broker, PayloadHandler);
    consumer.start().await.unwrap();
    broker.publish("ok-payload");
    eventually(|| metrics.processed_total() == 1).await;

    // Act
    broker.basic_cancel("server-side-cancel").await.unwrap();

    // Assert
    consumer.stop(Duration::from_secs(1)).await.unwrap();
    assert_eq!(consumer.state(), ConsumerState::Stopped);
}

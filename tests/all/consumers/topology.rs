use super::{consumer, routing};
use crate::helpers::{ExchangeDeclaration, FakeBroker, PayloadHandler};
use queue_consumer::amqp::{BrokerChannel, ExchangeKind};
use queue_consumer::consumers::hooks::pre_start::direct_exchange_topology;
use queue_consumer::consumers::{ConsumerPreStartHook, ConsumerState, StartError};
use std::time::Duration;

#[tokio::test]
async fn start_declares_a_durable_direct_exchange_bound_to_a_durable_queue() {
    // Arrange
    let broker = FakeBroker::default();
    let (consumer, _) = consumer(&broker, PayloadHandler);
    let exchange = consumer.routing().exchange().to_owned();
    let queue = consumer.routing().queue().to_owned();

    // Act
    consumer.start().await.unwrap();

    // Assert
    assert_eq!(
        broker.exchange(&exchange),
        Some(ExchangeDeclaration {
            kind: format!("{:?}", ExchangeKind::Direct),
            durable: true
        })
    );
    assert!(broker.is_durable_queue(&queue));
    assert!(broker
        .bindings()
        .contains(&(queue.clone(), exchange, queue)));

    consumer.stop(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn declaring_the_same_topology_twice_succeeds() {
    // Arrange
    let broker = FakeBroker::default();
    let routing = routing();
    let topology = direct_exchange_topology(&routing);

    // Act
    let first = topology.run(&broker, routing.queue()).await;
    let second = topology.run(&broker, routing.queue()).await;

    // Assert
    assert!(first.is_ok());
    assert!(second.is_ok());
    assert_eq!(broker.bindings().len(), 1);
}

#[tokio::test]
async fn start_fails_if_the_exchange_exists_with_a_different_type() {
    // Arrange
    let broker = FakeBroker::default();
    let (consumer, metrics) = consumer(&broker, PayloadHandler);
    broker.existing_exchange(consumer.routing().exchange(), ExchangeKind::Fanout);

    // Act
    let outcome = consumer.start().await;

    // Assert
    match outcome {
        Err(StartError::Topology { queue, .. }) => assert_eq!(queue, consumer.routing().queue()),
        other => panic!("Expected a topology error, got {other:?}"),
    }
    assert_eq!(broker.consume_calls(), 0);
    assert_eq!(consumer.state(), ConsumerState::Stopped);
    assert!(!broker.is_open());

    // Nothing is consumed after a failed start.
    broker.publish("ok-payload");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(broker.settlements().is_empty());
    assert_eq!(metrics.processed_total(), 0);
}

#[tokio::test]
async fn a_failed_subscription_leaves_no_background_task_behind() {
    // Arrange
    let broker = FakeBroker::default();
    let (consumer, _) = consumer(&broker, PayloadHandler);
    let consumer = consumer.with_monitor_interval(Duration::from_millis(10));
    broker.fail_consume();

    // Act
    let outcome = consumer.start().await;

    // Assert
    assert!(matches!(outcome, Err(StartError::Subscription { .. })));
    assert_eq!(consumer.state(), ConsumerState::Stopped);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(broker.depth_inspections(), 0);
    assert!(!broker.is_open());
}

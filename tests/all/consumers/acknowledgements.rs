use super::consumer;
use crate::helpers::{eventually, FakeBroker, PayloadHandler, RecordingHandler, Settlement};
use fake::{Fake, Faker};
use std::time::Duration;

#[tokio::test]
async fn a_successfully_processed_message_is_acked_exactly_once() {
    // Arrange
    let broker = FakeBroker::default();
    let (consumer, metrics) = consumer(&broker, PayloadHandler);
    consumer.start().await.unwrap();

    // Act
    let delivery_tag = broker.publish("ok-payload");
    eventually(|| !broker.settlements().is_empty()).await;

    // Assert
    assert_eq!(broker.settlements(), vec![Settlement::Ack(delivery_tag)]);
    assert_eq!(metrics.processed_total(), 1);
    assert_eq!(metrics.failed_total(), 0);
    assert_eq!(metrics.processing_observations(), 1);
    assert!(metrics.processing_seconds_total() > 0.);
    assert_eq!(metrics.size_observations(), 1);

    consumer.stop(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn a_failed_message_is_requeued_and_never_acked() {
    // Arrange
    let broker = FakeBroker::default();
    let (consumer, metrics) = consumer(&broker, PayloadHandler);
    consumer.start().await.unwrap();

    // Act
    let delivery_tag = broker.publish("bad-payload");
    eventually(|| !broker.settlements().is_empty()).await;

    // Assert
    assert_eq!(
        broker.settlements(),
        vec![Settlement::Nack {
            delivery_tag,
            requeue: true
        }]
    );
    assert_eq!(metrics.failed_total(), 1);
    assert_eq!(metrics.processed_total(), 0);
    assert_eq!(metrics.processing_observations(), 0);

    consumer.stop(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn a_failure_does_not_stop_the_consumer() {
    // Arrange
    let broker = FakeBroker::default();
    let (consumer, metrics) = consumer(&broker, PayloadHandler);
    consumer.start().await.unwrap();

    // Act
    let first = broker.publish("ok-payload");
    let second = broker.publish("bad-payload");
    let third = broker.publish("ok-payload");
    eventually(|| broker.settlements().len() == 3).await;

    // Assert
    assert_eq!(
        broker.settlements(),
        vec![
            Settlement::Ack(first),
            Settlement::Nack {
                delivery_tag: second,
                requeue: true
            },
            Settlement::Ack(third),
        ]
    );
    assert_eq!(metrics.processed_total(), 2);
    assert_eq!(metrics.failed_total(), 1);

    consumer.stop(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn messages_are_processed_and_acked_in_arrival_order() {
    // Arrange
    let broker = FakeBroker::default();
    let handler = RecordingHandler::default();
    let (consumer, _) = consumer(&broker, handler.clone());
    let payloads: Vec<Vec<u8>> = (0..20)
        .map(|_| Faker.fake::<String>().into_bytes())
        .collect();

    // Act
    consumer.start().await.unwrap();
    let delivery_tags: Vec<u64> = payloads
        .iter()
        .map(|payload| broker.publish(payload.clone()))
        .collect();
    eventually(|| broker.settlements().len() == payloads.len()).await;

    // Assert
    assert_eq!(handler.seen(), payloads);
    let expected: Vec<Settlement> = delivery_tags.into_iter().map(Settlement::Ack).collect();
    assert_eq!(broker.settlements(), expected);

    consumer.stop(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn messages_published_before_start_are_consumed() {
    // Arrange
    let broker = FakeBroker::default();
    let (consumer, metrics) = consumer(&broker, PayloadHandler);
    let delivery_tag = broker.publish("ok-payload");

    // Act
    consumer.start().await.unwrap();
    eventually(|| !broker.settlements().is_empty()).await;

    // Assert
    assert_eq!(broker.settlements(), vec![Settlement::Ack(delivery_tag)]);
    assert_eq!(metrics.processed_total(), 1);

    consumer.stop(Duration::from_secs(1)).await.unwrap();
}

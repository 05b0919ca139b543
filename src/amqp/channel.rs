//! The channel operations a consumer relies on, abstracted behind [`BrokerChannel`].
use crate::consumers::Delivery;
use amq_protocol_types::FieldTable;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use lapin::options::{
    BasicCancelOptions, BasicConsumeOptions, ExchangeDeclareOptions, QueueBindOptions,
    QueueDeclareOptions,
};
use lapin::{ChannelState, ExchangeKind};

/// The stream of messages pushed by the broker to a consumer.
pub type DeliveryStream = BoxStream<'static, Result<Delivery, anyhow::Error>>;

/// An open communication channel with a message broker.
///
/// `lapin::Channel` is the production implementation. The consumer only ever talks to
/// the broker through this trait, which keeps the acknowledgment state machine testable
/// without a running broker.
///
/// All methods must be safe to call concurrently: the consume loop and the queue depth
/// monitor share the same channel.
#[async_trait::async_trait]
pub trait BrokerChannel: Send + Sync + 'static {
    /// Declare an exchange. Idempotent if it already exists with the same properties.
    async fn exchange_declare(
        &self,
        exchange: &str,
        kind: ExchangeKind,
        options: ExchangeDeclareOptions,
    ) -> Result<(), anyhow::Error>;

    /// Declare a queue. Idempotent if it already exists with the same properties.
    async fn queue_declare(
        &self,
        queue: &str,
        options: QueueDeclareOptions,
    ) -> Result<(), anyhow::Error>;

    /// Bind `queue` to `exchange` using `routing_key`.
    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), anyhow::Error>;

    /// The number of messages ready for delivery in `queue`.
    ///
    /// This is a passive inspection: nothing is created or consumed.
    async fn queue_depth(&self, queue: &str) -> Result<u32, anyhow::Error>;

    /// Ask the broker to start pushing messages from `queue`.
    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        options: BasicConsumeOptions,
    ) -> Result<DeliveryStream, anyhow::Error>;

    /// Ask the broker to stop pushing messages to the consumer identified by `consumer_tag`.
    async fn basic_cancel(&self, consumer_tag: &str) -> Result<(), anyhow::Error>;

    /// Close the channel. Closing an already closed channel is not an error.
    async fn close(&self) -> Result<(), anyhow::Error>;

    fn is_open(&self) -> bool;
}

#[async_trait::async_trait]
impl BrokerChannel for lapin::Channel {
    async fn exchange_declare(
        &self,
        exchange: &str,
        kind: ExchangeKind,
        options: ExchangeDeclareOptions,
    ) -> Result<(), anyhow::Error> {
        lapin::Channel::exchange_declare(self, exchange, kind, options, FieldTable::default())
            .await?;
        Ok(())
    }

    async fn queue_declare(
        &self,
        queue: &str,
        options: QueueDeclareOptions,
    ) -> Result<(), anyhow::Error> {
        lapin::Channel::queue_declare(self, queue, options, FieldTable::default()).await?;
        Ok(())
    }

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), anyhow::Error> {
        lapin::Channel::queue_bind(
            self,
            queue,
            exchange,
            routing_key,
            QueueBindOptions { nowait: false },
            FieldTable::default(),
        )
        .await?;
        Ok(())
    }

    async fn queue_depth(&self, queue: &str) -> Result<u32, anyhow::Error> {
        let options = QueueDeclareOptions {
            passive: true,
            ..QueueDeclareOptions::default()
        };
        let queue =
            lapin::Channel::queue_declare(self, queue, options, FieldTable::default()).await?;
        Ok(queue.message_count())
    }

    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        options: BasicConsumeOptions,
    ) -> Result<DeliveryStream, anyhow::Error> {
        let consumer =
            lapin::Channel::basic_consume(self, queue, consumer_tag, options, FieldTable::default())
                .await?;
        Ok(consumer
            .map(|event| event.map(Delivery::from).map_err(anyhow::Error::from))
            .boxed())
    }

    async fn basic_cancel(&self, consumer_tag: &str) -> Result<(), anyhow::Error> {
        lapin::Channel::basic_cancel(self, consumer_tag, BasicCancelOptions::default()).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), anyhow::Error> {
        if !BrokerChannel::is_open(self) {
            return Ok(());
        }
        lapin::Channel::close(self, 200, "Bye").await?;
        Ok(())
    }

    fn is_open(&self) -> bool {
        matches!(self.status().state(), ChannelState::Connected)
    }
}

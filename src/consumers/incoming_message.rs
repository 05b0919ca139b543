use amq_protocol_types::DeliveryTag;
use lapin::options::{BasicAckOptions, BasicNackOptions};
use std::fmt;

/// Settles deliveries with the broker.
///
/// `lapin::acker::Acker` is the production implementation.
#[async_trait::async_trait]
pub trait Acknowledger: Send + Sync + 'static {
    /// Positive acknowledgement of this single delivery.
    async fn ack(&self) -> Result<(), anyhow::Error>;

    /// Negative acknowledgement of this single delivery.
    async fn nack(&self, requeue: bool) -> Result<(), anyhow::Error>;
}

#[async_trait::async_trait]
impl Acknowledger for lapin::acker::Acker {
    async fn ack(&self) -> Result<(), anyhow::Error> {
        lapin::acker::Acker::ack(self, BasicAckOptions { multiple: false }).await?;
        Ok(())
    }

    async fn nack(&self, requeue: bool) -> Result<(), anyhow::Error> {
        lapin::acker::Acker::nack(
            self,
            BasicNackOptions {
                multiple: false,
                requeue,
            },
        )
        .await?;
        Ok(())
    }
}

/// The action we ask the broker to take when finalising the processing of a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerAction {
    /// Positive acknowledgement - the message can be removed from the queue.
    Ack,
    /// Negative acknowledgement - the message was not processed successfully and is requeued
    /// to retry processing.
    Nack,
}

/// A received AMQP message.
pub struct Delivery {
    /// The delivery tag of the message.
    pub delivery_tag: DeliveryTag,

    /// Whether this message was redelivered
    pub redelivered: bool,

    /// The `message-id` property, if the publisher set one.
    pub message_id: Option<String>,

    /// The payload of the message in binary format.
    pub data: Vec<u8>,

    // Settling consumes the delivery: AMQP requires that a message is not acked/nacked
    // multiple times.
    // https://www.rabbitmq.com/amqp-0-9-1-reference.html#basic.ack.delivery-tag
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(delivery_tag: DeliveryTag, data: Vec<u8>, acker: impl Acknowledger) -> Self {
        Self {
            delivery_tag,
            redelivered: false,
            message_id: None,
            data,
            acker: Box::new(acker),
        }
    }

    /// Mark the delivery as a redelivery.
    #[must_use]
    pub fn redelivered(mut self, redelivered: bool) -> Self {
        self.redelivered = redelivered;
        self
    }

    /// Set the `message-id` property.
    #[must_use]
    pub fn message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    /// Communicate the outcome of processing to the broker.
    pub(crate) async fn settle(self, action: BrokerAction) -> Result<(), anyhow::Error> {
        match action {
            BrokerAction::Ack => self.acker.ack().await,
            BrokerAction::Nack => self.acker.nack(true).await,
        }
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("delivery_tag", &self.delivery_tag)
            .field("redelivered", &self.redelivered)
            .field("message_id", &self.message_id)
            .field("data", &self.data.len())
            .finish_non_exhaustive()
    }
}

impl From<lapin::message::Delivery> for Delivery {
    fn from(value: lapin::message::Delivery) -> Self {
        Self {
            delivery_tag: value.delivery_tag,
            redelivered: value.redelivered,
            message_id: value
                .properties
                .message_id()
                .as_ref()
                .map(|id| id.as_str().to_owned()),
            data: value.data,
            acker: Box::new(value.acker),
        }
    }
}

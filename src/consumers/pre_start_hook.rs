use crate::amqp::BrokerChannel;

#[async_trait::async_trait]
/// A hook to execute logic before a [`Consumer`] starts processing messages.
///
/// # Use case
///
/// A [`Consumer`] processes messages retrieved from a queue. Who is in charge of creating the
/// queue? What about the exchange the queue needs to be bound to?
///
/// The consumer declares the objects it relies on: a pre-start hook gives you access to the
/// channel, allowing you to perform actions against the message broker before the consumer
/// actually starts pulling messages.
///
/// [`Consumer`]: crate::consumers::Consumer
pub trait ConsumerPreStartHook: Send + Sync + 'static {
    async fn run(&self, channel: &dyn BrokerChannel, queue_name: &str)
        -> Result<(), anyhow::Error>;
}

/// assert it's object safe
type _CHECK = Box<dyn ConsumerPreStartHook>;

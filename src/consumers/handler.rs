use crate::consumers::error::HandlerError;

/// Implementers of the `MessageHandler` trait process the payload of the messages pulled
/// from a queue.
///
/// # Scope
///
/// `handle` does not get access to the underlying RabbitMq channel.
/// The [`Consumer`] takes care of acking/nacking the message with the broker according to the
/// outcome of processing:
///
/// - `Ok(())`: the message is acked and removed from the queue;
/// - `Err(_)`: the message is nacked and requeued for redelivery.
///
/// There is no limit on the number of redeliveries: a handler that fails deterministically on
/// a given payload will see that payload again and again.
///
/// [`Consumer`]: crate::consumers::Consumer
#[async_trait::async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, body: &[u8]) -> Result<(), HandlerError>;
}

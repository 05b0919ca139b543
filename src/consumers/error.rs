use super::ConsumerState;
use std::time::Duration;

/// The error type returned by message handlers.
///
/// A handler error never stops the consumer: the message is requeued and the consumer
/// moves on to the next delivery.
#[derive(thiserror::Error, Debug)]
#[error(transparent)]
pub struct HandlerError(#[from] anyhow::Error);

/// [`Consumer::start`](super::Consumer::start) failed. The consumer is not running.
#[derive(thiserror::Error, Debug)]
pub enum StartError {
    /// The broker refused to declare the exchange, the queue or the binding between them
    /// (e.g. mismatching properties on an existing object, permission denied).
    #[error("Failed to declare the RabbitMQ topology for queue `{queue}`.")]
    Topology {
        queue: String,
        #[source]
        source: anyhow::Error,
    },
    /// The broker refused to register the consumer (e.g. missing queue, closed channel).
    #[error("Failed to subscribe to queue `{queue}`.")]
    Subscription {
        queue: String,
        #[source]
        source: anyhow::Error,
    },
    /// A consumer can only be started once.
    #[error("Cannot start a consumer that is {0}.")]
    InvalidState(ConsumerState),
}

/// [`Consumer::stop`](super::Consumer::stop) did not complete cleanly.
#[derive(thiserror::Error, Debug)]
pub enum ShutdownError {
    #[error("The consumer did not shut down within {0:?}.")]
    DeadlineExceeded(Duration),
    #[error("Failed to close the broker channel.")]
    Close(#[source] anyhow::Error),
}

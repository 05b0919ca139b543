use crate::amqp::channel::{BrokerChannel, DeliveryStream};
use crate::amqp::configuration::RabbitMqSettings;
use lapin::options::{BasicConsumeOptions, ExchangeDeclareOptions, QueueDeclareOptions};
use lapin::{ConnectionProperties, ConnectionState, ExchangeKind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::warn;

/// We failed to establish a session with the RabbitMq broker.
#[derive(thiserror::Error, Debug)]
pub enum ConnectError {
    #[error("Timed out after {0:?} while trying to connect to RabbitMQ.")]
    Timeout(Duration),
    #[error("Failed to connect to RabbitMQ.")]
    Connect(#[source] lapin::Error),
    #[error("Failed to open a channel on the RabbitMQ connection.")]
    Channel(#[source] lapin::Error),
}

/// A connection to a RabbitMq broker together with the one channel used to talk to it.
///
/// `BrokerConnection` implements [`BrokerChannel`] by delegating to its channel, with one
/// exception: [`BrokerChannel::close`] tears down the channel *and* the underlying
/// connection.
pub struct BrokerConnection {
    connection: lapin::Connection,
    channel: lapin::Channel,
    closed: AtomicBool,
}

impl BrokerConnection {
    /// Connect to the broker described by `settings` and open a channel.
    ///
    /// If the channel cannot be opened, the connection is closed before returning the error.
    #[tracing::instrument(name = "rabbitmq_connect", skip_all)]
    pub async fn open(settings: &RabbitMqSettings) -> Result<Self, ConnectError> {
        let properties =
            ConnectionProperties::default().with_executor(tokio_executor_trait::Tokio::current());
        let timeout = settings.connection_timeout();
        let connection = match tokio::time::timeout(
            timeout,
            lapin::Connection::connect(settings.url.expose_secret(), properties),
        )
        .await
        {
            Ok(result) => result.map_err(ConnectError::Connect)?,
            Err(_) => return Err(ConnectError::Timeout(timeout)),
        };
        // Register a callback to log connection errors.
        connection.on_error(|e| {
            warn!("RabbitMQ broken connection: {:?}", e);
        });

        let channel = match connection.create_channel().await {
            Ok(channel) => channel,
            Err(e) => {
                if let Err(close_error) = connection.close(200, "Bye").await {
                    warn!(error = ?close_error, "Failed to close the RabbitMQ connection");
                }
                return Err(ConnectError::Channel(e));
            }
        };
        tracing::info!("Connected to RabbitMQ");

        Ok(Self {
            connection,
            channel,
            closed: AtomicBool::new(false),
        })
    }

    /// The underlying `lapin` channel.
    pub fn channel(&self) -> &lapin::Channel {
        &self.channel
    }
}

#[async_trait::async_trait]
impl BrokerChannel for BrokerConnection {
    async fn exchange_declare(
        &self,
        exchange: &str,
        kind: ExchangeKind,
        options: ExchangeDeclareOptions,
    ) -> Result<(), anyhow::Error> {
        BrokerChannel::exchange_declare(&self.channel, exchange, kind, options).await
    }

    async fn queue_declare(
        &self,
        queue: &str,
        options: QueueDeclareOptions,
    ) -> Result<(), anyhow::Error> {
        BrokerChannel::queue_declare(&self.channel, queue, options).await
    }

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), anyhow::Error> {
        BrokerChannel::queue_bind(&self.channel, queue, exchange, routing_key).await
    }

    async fn queue_depth(&self, queue: &str) -> Result<u32, anyhow::Error> {
        self.channel.queue_depth(queue).await
    }

    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        options: BasicConsumeOptions,
    ) -> Result<DeliveryStream, anyhow::Error> {
        BrokerChannel::basic_consume(&self.channel, queue, consumer_tag, options).await
    }

    async fn basic_cancel(&self, consumer_tag: &str) -> Result<(), anyhow::Error> {
        BrokerChannel::basic_cancel(&self.channel, consumer_tag).await
    }

    /// Closes the channel, then the connection.
    ///
    /// Only the first call does any work. A failure to close the connection is logged and
    /// swallowed; a failure to close the channel is returned.
    #[tracing::instrument(name = "rabbitmq_close", skip_all)]
    async fn close(&self) -> Result<(), anyhow::Error> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let channel_outcome = BrokerChannel::close(&self.channel).await;
        if matches!(self.connection.status().state(), ConnectionState::Connected) {
            if let Err(e) = self.connection.close(200, "Bye").await {
                warn!(error = ?e, "Failed to close the RabbitMQ connection");
            }
        }
        channel_outcome
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && BrokerChannel::is_open(&self.channel)
    }
}

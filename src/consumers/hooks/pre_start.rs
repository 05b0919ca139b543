//! Pre-start hooks to declare the broker objects a consumer relies on.
//!
//! ## Example
//!
//! ```
//! use queue_consumer::consumers::hooks::pre_start::{
//!     Bind,
//!     DeclareDurableExchange,
//!     DeclareDurableQueue,
//!     RoutingKey,
//!     ExchangeKind,
//! };
//!
//! // we want to bind a queue to an exchange
//! let pre_start_hook = Bind {
//!     // we will create a new durable exchange
//!     exchange: DeclareDurableExchange {
//!         // called `todo`
//!         name: "todo".to_owned(),
//!         // and it is a direct exchange
//!         kind: ExchangeKind::Direct,
//!     },
//!     // we will also create a durable queue
//!     queue: DeclareDurableQueue,
//!     // and bind them together using the queue name as routing key
//!     binding: RoutingKey::from("todo.events"),
//! };
//! # drop(pre_start_hook);
//! ```

use crate::amqp::configuration::RoutingConfig;
use crate::amqp::BrokerChannel;
use crate::consumers::ConsumerPreStartHook;
use async_trait::async_trait;
use lapin::options::{ExchangeDeclareOptions, QueueDeclareOptions};
pub use lapin::ExchangeKind;

#[async_trait::async_trait]
/// Defines how to setup an exchange
pub trait ExchangeSetup: Send + Sync + 'static {
    /// The name of the exchange that will be set up.
    fn exchange_name(&self) -> &str;

    /// Ensures the exchange is set up.
    async fn setup_exchange(&self, channel: &dyn BrokerChannel) -> Result<(), anyhow::Error>;
}

/// Declares a new durable exchange
pub struct DeclareDurableExchange {
    pub name: String,
    pub kind: ExchangeKind,
}

#[async_trait]
impl ExchangeSetup for DeclareDurableExchange {
    fn exchange_name(&self) -> &str {
        &self.name
    }

    async fn setup_exchange(&self, channel: &dyn BrokerChannel) -> Result<(), anyhow::Error> {
        channel
            .exchange_declare(
                &self.name,
                self.kind.clone(),
                ExchangeDeclareOptions {
                    passive: false,
                    durable: true,
                    auto_delete: false,
                    internal: false,
                    nowait: false,
                },
            )
            .await
    }
}

/// Bind the exchange defined by [`ExchangeSetup`] to the queue that will be defined in the nested `Queue` [`ConsumerPreStartHook`]
/// using the [`Binding`] method specified.
pub struct Bind<Exchange: ExchangeSetup, Queue: ConsumerPreStartHook, Binds: Binding> {
    pub exchange: Exchange,
    pub queue: Queue,
    pub binding: Binds,
}

#[async_trait::async_trait]
impl<E: ExchangeSetup, Q: ConsumerPreStartHook, B: Binding> ConsumerPreStartHook for Bind<E, Q, B> {
    async fn run(
        &self,
        channel: &dyn BrokerChannel,
        queue_name: &str,
    ) -> Result<(), anyhow::Error> {
        self.exchange.setup_exchange(channel).await?;
        self.queue.run(channel, queue_name).await?;
        self.binding
            .bind(channel, self.exchange.exchange_name(), queue_name)
            .await?;

        Ok(())
    }
}

/// Declare a durable, non-exclusive queue that survives its consumers.
#[derive(Clone)]
pub struct DeclareDurableQueue;

#[async_trait::async_trait]
impl ConsumerPreStartHook for DeclareDurableQueue {
    async fn run(
        &self,
        channel: &dyn BrokerChannel,
        queue_name: &str,
    ) -> Result<(), anyhow::Error> {
        channel
            .queue_declare(
                queue_name,
                QueueDeclareOptions {
                    passive: false,
                    durable: true,
                    exclusive: false,
                    auto_delete: false,
                    nowait: false,
                },
            )
            .await
    }
}

#[async_trait::async_trait]
/// Defines how to bind an exchange to a queue
pub trait Binding: Send + Sync + 'static {
    /// Ensure the binding exists
    async fn bind(
        &self,
        channel: &dyn BrokerChannel,
        exchange_name: &str,
        queue_name: &str,
    ) -> Result<(), anyhow::Error>;
}

/// Binds an exchange to a queue using a routing key.
pub struct RoutingKey(pub String);

impl From<&str> for RoutingKey {
    fn from(value: &str) -> Self {
        Self(value.into())
    }
}

impl From<String> for RoutingKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[async_trait::async_trait]
impl Binding for RoutingKey {
    async fn bind(
        &self,
        channel: &dyn BrokerChannel,
        exchange_name: &str,
        queue_name: &str,
    ) -> Result<(), anyhow::Error> {
        channel.queue_bind(queue_name, exchange_name, &self.0).await
    }
}

/// The topology of a single-queue consumer: a durable direct exchange, a durable queue and
/// a binding between them keyed by the queue name.
pub type DirectExchangeTopology = Bind<DeclareDurableExchange, DeclareDurableQueue, RoutingKey>;

/// Build the [`DirectExchangeTopology`] described by `routing`.
pub fn direct_exchange_topology(routing: &RoutingConfig) -> DirectExchangeTopology {
    Bind {
        exchange: DeclareDurableExchange {
            name: routing.exchange().to_owned(),
            kind: ExchangeKind::Direct,
        },
        queue: DeclareDurableQueue,
        binding: RoutingKey::from(routing.queue()),
    }
}

//! Helpers for connecting to a rabbitmq broker

mod channel;
pub mod configuration;
mod connection;

pub use channel::{BrokerChannel, DeliveryStream};
pub use connection::{BrokerConnection, ConnectError};

pub use lapin::{options, ExchangeKind};

//! Consume messages from a RabbitMq queue.
//!
//! [`Consumer`] is the starting point: it declares the topology it relies on, pulls messages
//! from its queue one at a time and hands them over to a [`MessageHandler`].
pub use consumer::{Consumer, ConsumerState, CLOSE_TIMEOUT, DEFAULT_MONITOR_INTERVAL};
pub use error::{HandlerError, ShutdownError, StartError};
pub use handler::MessageHandler;
pub use incoming_message::{Acknowledger, BrokerAction, Delivery};
pub use pre_start_hook::ConsumerPreStartHook;

mod consumer;
mod error;
mod handler;
pub mod hooks;
mod incoming_message;
mod monitor;
mod pre_start_hook;

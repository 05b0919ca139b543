//! `queue-consumer` pulls messages from a single RabbitMQ queue, built on top of [`lapin`].
//!
//! Messages are processed one at a time: each delivery is handed over to a
//! [`MessageHandler`](crate::consumers::MessageHandler) and acked, or requeued, according
//! to the outcome. Processing is observed through Prometheus metrics.
//!
//! [`Consumer`](crate::consumers::Consumer) is the best starting point to learn how
//! consumption works; [`startup::run_until_shutdown`] shows how the pieces fit together.

pub mod amqp;
pub mod configuration;
pub mod consumers;
pub mod metrics;
pub mod metrics_server;
pub mod processing;
pub mod startup;
pub mod telemetry;

//! What the service does with a message once it has been pulled from the queue.
//!
//! Processing is a stub for now: messages are logged and considered processed.
use crate::consumers::{HandlerError, MessageHandler};
use std::time::SystemTime;
use uuid::Uuid;

/// A message pulled from the queue, as seen by the processing logic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Random identifier used to correlate log lines for this message.
    pub id: String,
    pub content: Vec<u8>,
    /// When the message was received by this service.
    pub timestamp: SystemTime,
}

impl Message {
    pub fn from_bytes(content: &[u8]) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content: content.to_vec(),
            timestamp: SystemTime::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MessageService;

impl MessageService {
    #[tracing::instrument(name = "process", skip_all, fields(message_id = %message.id))]
    pub async fn process(&self, message: &Message) -> Result<(), anyhow::Error> {
        tracing::info!(
            content = %String::from_utf8_lossy(&message.content),
            "Processing message"
        );
        Ok(())
    }
}

/// [`MessageHandler`] handing every payload over to a [`MessageService`].
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingHandler {
    service: MessageService,
}

impl LoggingHandler {
    pub fn new(service: MessageService) -> Self {
        Self { service }
    }
}

#[async_trait::async_trait]
impl MessageHandler for LoggingHandler {
    async fn handle(&self, body: &[u8]) -> Result<(), HandlerError> {
        let message = Message::from_bytes(body);
        self.service.process(&message).await?;
        Ok(())
    }
}

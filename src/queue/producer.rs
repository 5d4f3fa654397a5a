use lapin::{options::*, types::FieldTable, BasicProperties, Connection, Error as LapinError};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Failed to open channel: {0}")]
    ChannelError(#[from] LapinError),

    #[error("Failed to serialize message: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Publishes messages to named queues over the shared broker connection.
///
/// Each publish opens its own transient channel, declares the destination
/// queue idempotently, and marks the message persistent. No publisher
/// confirms are tracked; only local failures (channel, declare,
/// serialization) are observable to the caller.
pub struct PushProducer {
    conn: Arc<Connection>,
}

impl PushProducer {
    pub fn new(conn: Arc<Connection>) -> Self {
        PushProducer { conn }
    }

    pub async fn publish<T: Serialize>(
        &self,
        queue_name: &str,
        message: &T,
        correlation_id: &str,
    ) -> Result<(), PublishError> {
        let channel = self.conn.create_channel().await?;

        // Idempotent declare, same durability as the consumer side
        channel
            .queue_declare(
                queue_name,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;

        let payload = serde_json::to_vec(message)?;

        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_correlation_id(correlation_id.into())
            .with_delivery_mode(2); // persistent

        // Fire-and-forget: the confirm future is dropped, broker-side failure
        // after publish is invisible here
        let _confirm = channel
            .basic_publish(
                "",
                queue_name,
                BasicPublishOptions::default(),
                &payload,
                properties,
            )
            .await?;

        info!(
            "[{}] Published message to queue '{}'",
            correlation_id, queue_name
        );

        channel.close(200, "publish complete").await?;
        Ok(())
    }
}

use async_trait::async_trait;
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties,
    options::{BasicPublishOptions, QueueDeclareOptions},
    types::FieldTable,
};
use tracing::debug;

use super::{BrokerChannel, BrokerConnector, PublishError};

/// RabbitMQ connector over AMQP 0-9-1.
#[derive(Debug, Clone)]
pub struct AmqpConnector {
    uri: String,
}

impl AmqpConnector {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }
}

#[async_trait]
impl BrokerConnector for AmqpConnector {
    async fn connect(&self) -> Result<Box<dyn BrokerChannel>, PublishError> {
        let connection = Connection::connect(&self.uri, ConnectionProperties::default())
            .await
            .map_err(|e| PublishError::Connect(e.to_string()))?;

        let channel = match connection.create_channel().await {
            Ok(channel) => channel,
            Err(err) => {
                if let Err(close_err) = connection.close(0, "channel setup failed").await {
                    debug!(error = %close_err, "Error closing half-open connection");
                }
                return Err(PublishError::Connect(err.to_string()));
            }
        };

        Ok(Box::new(AmqpChannel { connection, channel }))
    }
}

struct AmqpChannel {
    connection: Connection,
    channel: Channel,
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    async fn declare_queue(&mut self, queue: &str) -> Result<(), PublishError> {
        let options = QueueDeclareOptions {
            durable: true,
            exclusive: false,
            auto_delete: false,
            ..Default::default()
        };

        self.channel
            .queue_declare(queue, options, FieldTable::default())
            .await
            .map(|_| ())
            .map_err(|e| PublishError::Declare { queue: queue.to_string(), reason: e.to_string() })
    }

    async fn publish(&mut self, queue: &str, body: &[u8]) -> Result<(), PublishError> {
        // The returned confirm is dropped: no delivery confirmation wait.
        self.channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                body,
                BasicProperties::default(),
            )
            .await
            .map(|_confirm| ())
            .map_err(|e| PublishError::Publish { queue: queue.to_string(), reason: e.to_string() })
    }

    async fn close(self: Box<Self>) -> Result<(), PublishError> {
        self.connection.close(200, "OK").await.map_err(|e| PublishError::Close(e.to_string()))
    }
}

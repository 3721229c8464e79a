//! Queue publisher: connect with retries, declare, publish, always close.

use async_trait::async_trait;
use std::{fmt::Debug, sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::config::BrokerConfig;

pub mod amqp;

pub use amqp::AmqpConnector;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Broker connection failed: {0}")]
    Connect(String),

    #[error("Declaring queue '{queue}' failed: {reason}")]
    Declare { queue: String, reason: String },

    #[error("Publishing to queue '{queue}' failed: {reason}")]
    Publish { queue: String, reason: String },

    #[error("Closing broker connection failed: {0}")]
    Close(String),
}

/// Lifecycle of a single `publish` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishState {
    Disconnected,
    Connecting { attempt: u32 },
    Connected,
    Declaring,
    Publishing,
    Closed,
    Failed,
}

/// Opens broker connections.
#[async_trait]
pub trait BrokerConnector: Send + Sync + Debug {
    async fn connect(&self) -> Result<Box<dyn BrokerChannel>, PublishError>;
}

/// An open connection plus channel. Owned by exactly one `publish` call and
/// consumed by [`BrokerChannel::close`].
#[async_trait]
pub trait BrokerChannel: Send {
    /// Durable, non-exclusive, non-auto-deleting; a no-op when the queue exists.
    async fn declare_queue(&mut self, queue: &str) -> Result<(), PublishError>;

    /// Default exchange, routing key = queue name, no confirm wait.
    async fn publish(&mut self, queue: &str, body: &[u8]) -> Result<(), PublishError>;

    async fn close(self: Box<Self>) -> Result<(), PublishError>;
}

/// Fixed-interval connect retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectRetry {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for ConnectRetry {
    fn default() -> Self {
        Self { max_attempts: 10, delay: Duration::from_secs(2) }
    }
}

#[derive(Debug, Clone)]
pub struct QueuePublisher {
    connector: Arc<dyn BrokerConnector>,
    retry: ConnectRetry,
    default_queue: String,
}

impl QueuePublisher {
    pub fn new(
        connector: Arc<dyn BrokerConnector>,
        retry: ConnectRetry,
        default_queue: impl Into<String>,
    ) -> Self {
        Self { connector, retry, default_queue: default_queue.into() }
    }

    /// AMQP publisher for the configured broker.
    pub fn from_config(config: &BrokerConfig) -> anyhow::Result<Self> {
        let connector = Arc::new(AmqpConnector::new(config.amqp_uri()?));
        let retry = ConnectRetry {
            max_attempts: config.connect_attempts,
            delay: config.retry_delay(),
        };
        info!(queue = %config.queue, "RabbitMQ publisher initialized");
        Ok(Self::new(connector, retry, config.queue.clone()))
    }

    pub fn default_queue(&self) -> &str {
        &self.default_queue
    }

    pub async fn publish_default(&self, message: &[u8]) -> bool {
        self.publish(message, &self.default_queue).await
    }

    /// Publish one message. `true` only when the broker accepted it; every
    /// failure is logged and reported as `false`. An opened connection is
    /// closed on every path.
    #[instrument(skip(self, message), fields(bytes = message.len()))]
    pub async fn publish(&self, message: &[u8], queue: &str) -> bool {
        let mut state = PublishState::Disconnected;

        let Some(mut channel) = self.connect(&mut state).await else {
            enter(&mut state, PublishState::Failed);
            error!("Failed to connect to RabbitMQ after all retries");
            return false;
        };
        enter(&mut state, PublishState::Connected);

        enter(&mut state, PublishState::Declaring);
        let result = match channel.declare_queue(queue).await {
            Ok(()) => {
                enter(&mut state, PublishState::Publishing);
                channel.publish(queue, message).await
            }
            Err(err) => Err(err),
        };

        if let Err(err) = channel.close().await {
            warn!(error = %err, "Error closing broker connection");
        }
        enter(&mut state, PublishState::Closed);

        match result {
            Ok(()) => {
                info!(queue, "Message published");
                true
            }
            Err(err) => {
                error!(error = %err, "Error publishing message");
                false
            }
        }
    }

    async fn connect(&self, state: &mut PublishState) -> Option<Box<dyn BrokerChannel>> {
        let max = self.retry.max_attempts.max(1);

        for attempt in 1..=max {
            enter(state, PublishState::Connecting { attempt });
            match self.connector.connect().await {
                Ok(channel) => {
                    info!(attempt, "Connected to RabbitMQ");
                    return Some(channel);
                }
                Err(err) => {
                    warn!(attempt, max, error = %err, "Connection attempt failed");
                    if attempt < max {
                        tokio::time::sleep(self.retry.delay).await;
                    }
                }
            }
        }

        None
    }
}

fn enter(state: &mut PublishState, next: PublishState) {
    debug!(from = ?*state, to = ?next, "Publisher state change");
    *state = next;
}

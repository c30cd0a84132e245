use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use tracing::info;

use crate::errors::LomsError;
use crate::models::OutboxMessage;

/// Delivers one outbox message to the outside world.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send_notification(&self, message: &OutboxMessage) -> Result<(), LomsError>;
}

/// Publishes notifications to a Kafka topic, keyed by order id so that all events of one order
/// land on the same partition in order.
pub struct KafkaSender {
    producer: FutureProducer,
    topic: String,
}

impl KafkaSender {
    pub fn new(brokers: &str, topic: impl Into<String>) -> anyhow::Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .create()?;

        Ok(Self {
            producer,
            topic: topic.into(),
        })
    }
}

#[async_trait]
impl NotificationSender for KafkaSender {
    async fn send_notification(&self, message: &OutboxMessage) -> Result<(), LomsError> {
        let record = FutureRecord::to(&self.topic)
            .payload(&message.message)
            .key(&message.key);

        let (partition, offset) = self
            .producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| LomsError::Notification(e.to_string()))?;

        info!(
            msg_id = message.msg_id,
            key = %message.key,
            "notification sent to partition {} at offset {}",
            partition,
            offset
        );
        Ok(())
    }
}

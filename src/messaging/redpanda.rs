use std::time::Duration;

use async_trait::async_trait;
use rdkafka::{
    config::ClientConfig,
    error::KafkaError,
    message::{Header, OwnedHeaders},
    producer::{FutureProducer, FutureRecord},
    util::Timeout,
};

use super::{Notification, NotificationChannel};
use crate::config::NotifierConfig;
use crate::errors::ChannelError;

/// Publishes notifications to a Kafka-compatible topic (Redpanda in
/// development). Subscribers fan the message out to customers.
pub struct RedpandaChannel {
    producer: FutureProducer,
    topic: String,
    call_timeout: Duration,
}

impl RedpandaChannel {
    pub fn new(cfg: &NotifierConfig) -> Result<Self, KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &cfg.brokers)
            .set("message.timeout.ms", cfg.call_timeout.as_millis().to_string())
            .create()?;

        Ok(Self {
            producer,
            topic: cfg.topic.clone(),
            call_timeout: cfg.call_timeout,
        })
    }
}

#[async_trait]
impl NotificationChannel for RedpandaChannel {
    async fn publish(&self, notification: &Notification) -> Result<(), ChannelError> {
        let payload = serde_json::to_string(notification)?;
        let headers = OwnedHeaders::new().insert(Header {
            key: "subject",
            value: Some(notification.subject.as_str()),
        });

        let record = FutureRecord::to(&self.topic)
            .key(&notification.order_id)
            .payload(&payload)
            .headers(headers);

        match self.producer.send(record, Timeout::After(self.call_timeout)).await {
            Ok(_) => {
                tracing::info!(
                    topic = %self.topic,
                    order_id = %notification.order_id,
                    subject = %notification.subject,
                    "Published notification"
                );
                Ok(())
            }
            Err((KafkaError::MessageProduction(code), _))
                if code == rdkafka::types::RDKafkaErrorCode::MessageTimedOut =>
            {
                Err(ChannelError::Timeout(self.call_timeout))
            }
            Err((e, _)) => {
                tracing::error!(
                    error = %e,
                    topic = %self.topic,
                    order_id = %notification.order_id,
                    "Failed to publish notification"
                );
                Err(ChannelError::Unavailable(e.to_string()))
            }
        }
    }
}

mod redpanda;

pub use redpanda::RedpandaChannel;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::ChannelError;

/// A customer-facing status message, ready to publish.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Notification {
    pub order_id: String,
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

/// Fire-and-forget fan-out of a message to every subscriber of a topic.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn publish(&self, notification: &Notification) -> Result<(), ChannelError>;
}

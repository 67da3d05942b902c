use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::EscalationConfig;
use crate::errors::AdvanceError;

pub const ADVANCE_PATH: &str = "/trigger/advance";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AdvanceRequest {
    #[serde(rename = "orderId", default)]
    pub order_id: String,
}

/// Sends a transition request for one order to the transition processor.
#[async_trait]
pub trait AdvanceClient: Send + Sync {
    async fn request_advance(&self, order_id: &str) -> Result<(), AdvanceError>;
}

pub struct HttpAdvanceClient {
    http: reqwest::Client,
    url: String,
}

impl HttpAdvanceClient {
    pub fn new(cfg: &EscalationConfig) -> Result<Self, AdvanceError> {
        let http = reqwest::Client::builder().timeout(cfg.call_timeout).build()?;
        Ok(Self {
            http,
            url: format!("{}{}", cfg.target_base_url(), ADVANCE_PATH),
        })
    }
}

#[async_trait]
impl AdvanceClient for HttpAdvanceClient {
    async fn request_advance(&self, order_id: &str) -> Result<(), AdvanceError> {
        let response = self
            .http
            .post(&self.url)
            .json(&AdvanceRequest { order_id: order_id.to_string() })
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(order_id = %order_id, status = status.as_u16(), "Advance request accepted");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(AdvanceError::Status { status: status.as_u16(), body })
    }
}

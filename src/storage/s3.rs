use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::Client;

use super::{ObjectLocation, ObjectMetadataSource};
use crate::config::StorageConfig;
use crate::errors::MetadataError;

/// Resolves order tags from S3 user metadata via `HeadObject`.
pub struct S3MetadataSource {
    client: Client,
    metadata_key: String,
    call_timeout: Duration,
}

impl S3MetadataSource {
    /// Build a client from the default credential chain, with optional
    /// region and endpoint overrides (for S3-compatible services).
    pub async fn new(cfg: &StorageConfig) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = &cfg.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }
        let shared = loader.load().await;

        let mut s3_config = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = &cfg.endpoint {
            s3_config = s3_config.endpoint_url(endpoint).force_path_style(true);
        }

        Self::with_client(Client::from_conf(s3_config.build()), cfg)
    }

    pub fn with_client(client: Client, cfg: &StorageConfig) -> Self {
        Self {
            client,
            metadata_key: cfg.metadata_key.clone(),
            call_timeout: cfg.call_timeout,
        }
    }
}

#[async_trait]
impl ObjectMetadataSource for S3MetadataSource {
    async fn order_tag(&self, location: &ObjectLocation) -> Result<Option<String>, MetadataError> {
        let head = self
            .client
            .head_object()
            .bucket(&location.bucket)
            .key(&location.key)
            .send();

        let response = match tokio::time::timeout(self.call_timeout, head).await {
            Err(_) => return Err(MetadataError::Timeout(self.call_timeout)),
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                if err.as_service_error().map(|e| e.is_not_found()).unwrap_or(false) {
                    tracing::debug!(object = %location, "Object no longer exists");
                    return Ok(None);
                }
                return Err(MetadataError::Unavailable(format!("HeadObject {location} failed: {err}")));
            }
        };

        let tag = response
            .metadata()
            .and_then(|metadata| metadata.get(&self.metadata_key))
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        Ok(tag)
    }
}

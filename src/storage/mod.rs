//! Object-storage upload events and the metadata lookup that ties an
//! uploaded shipment document back to its order.

mod s3;

pub use s3::S3MetadataSource;

use async_trait::async_trait;
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};

use crate::errors::MetadataError;

/// Upload notification as delivered by the object store: a batch of
/// records, each naming one object.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageEvent {
    #[serde(rename = "Records", default)]
    pub records: Vec<StorageEventRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageEventRecord {
    #[serde(default)]
    pub event_name: Option<String>,
    #[serde(default)]
    pub s3: Option<S3Entity>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Entity {
    pub bucket: S3Bucket,
    pub object: S3Object,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Bucket {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Object {
    pub key: String,
    #[serde(default)]
    pub size: Option<u64>,
}

/// A decoded bucket/key pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
}

impl std::fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

impl StorageEventRecord {
    /// Whether this record reports a new object. Records without an event
    /// name are treated as uploads.
    pub fn is_upload(&self) -> bool {
        self.event_name
            .as_deref()
            .map(|name| name.starts_with("ObjectCreated"))
            .unwrap_or(true)
    }

    pub fn location(&self) -> Option<ObjectLocation> {
        let s3 = self.s3.as_ref()?;
        let key = decode_object_key(&s3.object.key);
        if s3.bucket.name.is_empty() || key.is_empty() {
            return None;
        }
        Some(ObjectLocation {
            bucket: s3.bucket.name.clone(),
            key,
        })
    }
}

/// Object keys arrive form-encoded: `+` for spaces and `%XX` escapes.
/// Invalid escapes are kept literally.
pub fn decode_object_key(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}

/// Reads the order identifier pre-attached to a stored object.
#[async_trait]
pub trait ObjectMetadataSource: Send + Sync {
    /// `Ok(None)` when the object carries no order tag, or no longer exists.
    async fn order_tag(&self, location: &ObjectLocation) -> Result<Option<String>, MetadataError>;
}

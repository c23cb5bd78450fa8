//! Remote object storage seam.
//!
//! The reconciliation logic only needs four primitives from the bucket; they are
//! expressed as the [`RemoteStore`] trait so the production S3-compatible client
//! and test doubles are interchangeable.

pub mod object;

use crate::utils::{Result, SyncError};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;

pub use object::ObjectStoreRemote;

/// Version token of a stored object (ETag and/or backend version id).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectVersion {
    pub e_tag: Option<String>,
    pub version: Option<String>,
}

impl ObjectVersion {
    pub fn is_known(&self) -> bool {
        self.e_tag.is_some() || self.version.is_some()
    }
}

/// Precondition attached to a write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum WriteCondition {
    /// Unconditional write
    #[default]
    Overwrite,

    /// Fail if the key already exists
    Create,

    /// Fail unless the stored object still has this version
    Match(ObjectVersion),
}

/// Headers and precondition for a `put`.
#[derive(Debug, Clone, Default)]
pub struct PutRequest {
    pub cache_control: Option<String>,
    pub content_type: Option<String>,
    pub condition: WriteCondition,
}

/// Body and version of a fetched object.
#[derive(Debug, Clone)]
pub struct RemoteObject {
    pub body: Bytes,
    pub version: ObjectVersion,
}

/// Listing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMeta {
    pub key: String,
    pub size: u64,
    pub e_tag: Option<String>,
    pub last_modified: DateTime<Utc>,
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetch an object. A missing key is `SyncError::NotFound`.
    async fn get(&self, key: &str) -> Result<RemoteObject>;

    /// Store an object, returning its new version.
    async fn put(&self, key: &str, body: Bytes, request: PutRequest) -> Result<ObjectVersion>;

    /// List objects under an optional prefix.
    async fn list(&self, prefix: Option<&str>) -> Result<Vec<RemoteMeta>>;

    /// Server-side copy.
    async fn copy(&self, from: &str, to: &str) -> Result<()>;
}

/// Bound a store call; expiry becomes a retryable `SyncError::Timeout`.
pub async fn with_timeout<T, F>(timeout: Duration, operation: &str, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(SyncError::Timeout {
            operation: operation.to_string(),
            secs: timeout.as_secs(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_timeout_expires() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, SyncError>(())
        };
        let err = with_timeout(Duration::from_millis(10), "put assets/a.css", slow)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Timeout { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_version_known() {
        assert!(!ObjectVersion::default().is_known());
        let v = ObjectVersion {
            e_tag: Some("\"abc\"".to_string()),
            version: None,
        };
        assert!(v.is_known());
    }
}

//! [`RemoteStore`] backed by the `object_store` crate.
//!
//! Production runs talk to Tencent COS through its S3-compatible API; tests use
//! the crate's in-memory store, which implements the same conditional-put
//! semantics.

use super::{ObjectVersion, PutRequest, RemoteMeta, RemoteObject, RemoteStore, WriteCondition};
use crate::config::StorageConfig;
use crate::utils::{Result, SyncError};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::TryStreamExt;
use object_store::aws::{AmazonS3Builder, S3ConditionalPut};
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{
    Attribute, Attributes, ClientOptions, ObjectMeta, ObjectStore, PutMode, PutOptions,
    PutPayload, RetryConfig, UpdateVersion,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub struct ObjectStoreRemote {
    inner: Arc<dyn ObjectStore>,
}

impl ObjectStoreRemote {
    pub fn new(inner: Arc<dyn ObjectStore>) -> Self {
        Self { inner }
    }

    /// Empty in-memory bucket.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()))
    }

    /// Build the S3-compatible client for the configured bucket.
    ///
    /// The client's own retry loop is disabled; the uploader owns retries so the
    /// configured count and backoff are the only ones applied.
    pub fn from_config(storage: &StorageConfig, timeout: Duration) -> Result<Self> {
        let bucket = storage
            .bucket
            .as_deref()
            .ok_or_else(|| SyncError::Config("bucket not set".to_string()))?;
        let endpoint = storage
            .resolved_endpoint()
            .ok_or_else(|| SyncError::Config("cannot resolve storage endpoint".to_string()))?;

        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(bucket)
            .with_region(&storage.region)
            .with_endpoint(&endpoint)
            // the default COS endpoint already carries the bucket in its host name
            .with_virtual_hosted_style_request(storage.endpoint.is_none())
            .with_allow_http(endpoint.starts_with("http://"))
            .with_client_options(ClientOptions::new().with_timeout(timeout))
            .with_retry(RetryConfig {
                max_retries: 0,
                ..Default::default()
            });

        if let Some(id) = &storage.secret_id {
            builder = builder.with_access_key_id(id);
        }
        if let Some(key) = &storage.secret_key {
            builder = builder.with_secret_access_key(key);
        }
        if storage.conditional_save {
            builder = builder.with_conditional_put(S3ConditionalPut::ETagMatch);
        }

        let store = builder
            .build()
            .map_err(|e| SyncError::Config(format!("failed to build S3 client: {}", e)))?;

        debug!("Object store ready: {} (bucket {})", endpoint, bucket);
        Ok(Self::new(Arc::new(store)))
    }
}

fn version_of(meta: &ObjectMeta) -> ObjectVersion {
    ObjectVersion {
        e_tag: meta.e_tag.clone(),
        version: meta.version.clone(),
    }
}

#[async_trait]
impl RemoteStore for ObjectStoreRemote {
    async fn get(&self, key: &str) -> Result<RemoteObject> {
        let result = self.inner.get(&Path::from(key)).await?;
        let version = version_of(&result.meta);
        let body = result.bytes().await?;
        Ok(RemoteObject { body, version })
    }

    async fn put(&self, key: &str, body: Bytes, request: PutRequest) -> Result<ObjectVersion> {
        let mut attributes = Attributes::new();
        if let Some(cache_control) = request.cache_control {
            attributes.insert(Attribute::CacheControl, cache_control.into());
        }
        if let Some(content_type) = request.content_type {
            attributes.insert(Attribute::ContentType, content_type.into());
        }

        let mode = match request.condition {
            WriteCondition::Overwrite => PutMode::Overwrite,
            WriteCondition::Create => PutMode::Create,
            WriteCondition::Match(v) => PutMode::Update(UpdateVersion {
                e_tag: v.e_tag,
                version: v.version,
            }),
        };

        let options = PutOptions {
            mode,
            attributes,
            ..Default::default()
        };

        let result = self
            .inner
            .put_opts(&Path::from(key), PutPayload::from(body), options)
            .await?;

        Ok(ObjectVersion {
            e_tag: result.e_tag,
            version: result.version,
        })
    }

    async fn list(&self, prefix: Option<&str>) -> Result<Vec<RemoteMeta>> {
        let prefix = prefix.map(Path::from);
        let objects: Vec<ObjectMeta> = self.inner.list(prefix.as_ref()).try_collect().await?;

        Ok(objects
            .into_iter()
            .map(|meta| RemoteMeta {
                key: meta.location.to_string(),
                size: meta.size as u64,
                e_tag: meta.e_tag.map(|t| t.trim_matches('"').to_string()),
                last_modified: meta.last_modified,
            })
            .collect())
    }

    async fn copy(&self, from: &str, to: &str) -> Result<()> {
        self.inner.copy(&Path::from(from), &Path::from(to)).await?;
        Ok(())
    }
}

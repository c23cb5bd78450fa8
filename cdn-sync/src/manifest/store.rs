//! Remote manifest load/save.
//!
//! Loading never fails: a missing, corrupt or unreachable manifest yields an
//! empty one so a deployment is never blocked by it. Saving is conditional on
//! the version that was loaded when the backend supports it.

use super::Manifest;
use crate::store::{with_timeout, ObjectVersion, PutRequest, RemoteStore, WriteCondition};
use crate::utils::{Result, SyncError};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// What the run knows about the stored manifest document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestVersion {
    /// Not present in the bucket
    Absent,

    /// Present with this version
    Known(ObjectVersion),

    /// Could not be determined (load failed)
    Unknown,
}

/// How the load went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadStatus {
    Loaded { entries: usize, dropped: usize },
    Missing,
    Corrupt(String),
    Unavailable(String),
}

#[derive(Debug, Clone)]
pub struct LoadedManifest {
    pub manifest: Manifest,
    pub version: ManifestVersion,
    pub status: LoadStatus,
}

pub struct ManifestStore {
    store: Arc<dyn RemoteStore>,
    key: String,
    conditional: bool,
    timeout: Duration,
}

impl ManifestStore {
    pub fn new(store: Arc<dyn RemoteStore>, key: impl Into<String>, conditional: bool, timeout: Duration) -> Self {
        Self {
            store,
            key: key.into(),
            conditional,
            timeout,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Fetch and parse the manifest.
    pub async fn load(&self) -> LoadedManifest {
        let fetched = with_timeout(self.timeout, "manifest download", self.store.get(&self.key)).await;

        match fetched {
            Ok(object) => match Manifest::from_json(&object.body) {
                Ok((manifest, dropped)) => {
                    info!("Loaded manifest {}: {} entries", self.key, manifest.len());
                    LoadedManifest {
                        status: LoadStatus::Loaded {
                            entries: manifest.len(),
                            dropped,
                        },
                        manifest,
                        version: ManifestVersion::Known(object.version),
                    }
                }
                Err(e) => {
                    warn!("Manifest {} is malformed ({}), starting from an empty manifest", self.key, e);
                    LoadedManifest {
                        manifest: Manifest::new(),
                        version: ManifestVersion::Known(object.version),
                        status: LoadStatus::Corrupt(e.to_string()),
                    }
                }
            },
            Err(SyncError::NotFound(_)) => {
                info!("Manifest {} does not exist yet, starting from an empty manifest", self.key);
                LoadedManifest {
                    manifest: Manifest::new(),
                    version: ManifestVersion::Absent,
                    status: LoadStatus::Missing,
                }
            }
            Err(e) => {
                warn!("Failed to download manifest {} ({}), starting from an empty manifest", self.key, e);
                LoadedManifest {
                    manifest: Manifest::new(),
                    version: ManifestVersion::Unknown,
                    status: LoadStatus::Unavailable(e.to_string()),
                }
            }
        }
    }

    /// Write a serialized manifest, returning the new version.
    ///
    /// With conditional saves enabled, an absent or unknown document is only
    /// created (never overwritten) and a known one is only replaced if it is
    /// unchanged; a violated precondition is `SyncError::Conflict`.
    pub async fn save(&self, body: Bytes, version: &ManifestVersion) -> Result<ObjectVersion> {
        let condition = match (self.conditional, version) {
            (false, _) => WriteCondition::Overwrite,
            (true, ManifestVersion::Known(v)) if v.is_known() => WriteCondition::Match(v.clone()),
            (true, ManifestVersion::Known(_)) => WriteCondition::Overwrite,
            (true, ManifestVersion::Absent | ManifestVersion::Unknown) => WriteCondition::Create,
        };

        let conditional = condition != WriteCondition::Overwrite;
        match self.put(body.clone(), condition).await {
            Err(SyncError::NotImplemented(_)) if conditional => {
                warn!("Storage backend rejected a conditional manifest write; overwriting unconditionally");
                self.put(body, WriteCondition::Overwrite).await
            }
            other => other,
        }
    }

    async fn put(&self, body: Bytes, condition: WriteCondition) -> Result<ObjectVersion> {
        let request = PutRequest {
            cache_control: Some("no-cache".to_string()),
            content_type: Some("application/json".to_string()),
            condition,
        };
        with_timeout(self.timeout, "manifest upload", self.store.put(&self.key, body, request)).await
    }
}

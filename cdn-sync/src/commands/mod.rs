//! Command-line subcommands.

pub mod manifest;
pub mod probe;
pub mod upload;
pub mod verify;

use crate::config::Config;
use crate::manifest::{LoadedManifest, ManifestStore};
use crate::store::{ObjectStoreRemote, RemoteStore};
use crate::utils::Result;
use std::sync::Arc;

/// Validate storage settings and connect to the bucket.
pub fn open_store(config: &Config) -> Result<Arc<dyn RemoteStore>> {
    config.validate_storage()?;
    let store = ObjectStoreRemote::from_config(&config.storage, config.upload.timeout())?;
    Ok(Arc::new(store))
}

/// Load the manifest for read-only commands.
pub async fn load_manifest(config: &Config, store: Arc<dyn RemoteStore>) -> LoadedManifest {
    ManifestStore::new(
        store,
        config.storage.manifest_key.clone(),
        config.storage.conditional_save,
        config.upload.timeout(),
    )
    .load()
    .await
}

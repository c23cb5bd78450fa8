//! Manifest persistence during a run.
//!
//! Writes are idempotent (an identical document is never written twice) and
//! optimistic: if another writer replaced the manifest since it was loaded, the
//! remote copy is reloaded, this run's entries are re-applied on top of it and
//! the save is retried. Failures are logged, never propagated.

use super::{LoadStatus, Manifest, ManifestStore, ManifestVersion};
use crate::utils::SyncError;
use bytes::Bytes;
use tracing::{info, warn};

const MAX_SAVE_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Written
    Saved,

    /// Written after merging with a concurrently updated manifest
    Merged,

    /// Identical to the last written document, or nothing changed
    Unchanged,

    /// Gave up after repeated concurrent modifications
    Conflict,

    /// Write failed; uploaded objects are newer than the manifest says
    Failed(String),
}

impl SaveOutcome {
    pub fn is_persisted(&self) -> bool {
        matches!(self, SaveOutcome::Saved | SaveOutcome::Merged | SaveOutcome::Unchanged)
    }
}

pub struct ManifestWriter {
    store: ManifestStore,
    version: ManifestVersion,
    last_written: Option<Bytes>,
}

impl ManifestWriter {
    /// `version` is the version the manifest was loaded at.
    pub fn new(store: ManifestStore, version: ManifestVersion) -> Self {
        Self {
            store,
            version,
            last_written: None,
        }
    }

    pub fn version(&self) -> &ManifestVersion {
        &self.version
    }

    /// Persist the manifest. May rebase `manifest` onto a newer remote copy.
    pub async fn persist(&mut self, manifest: &mut Manifest) -> SaveOutcome {
        if !manifest.has_changes() {
            return SaveOutcome::Unchanged;
        }

        let mut merged = false;
        for attempt in 1..=MAX_SAVE_ATTEMPTS {
            let body = match manifest.to_json() {
                Ok(body) => Bytes::from(body),
                Err(e) => {
                    warn!("Failed to serialize manifest: {}", e);
                    return SaveOutcome::Failed(e.to_string());
                }
            };

            if self.last_written.as_ref() == Some(&body) {
                return SaveOutcome::Unchanged;
            }

            match self.store.save(body.clone(), &self.version).await {
                Ok(version) => {
                    info!(
                        "Saved manifest {} ({} entries)",
                        self.store.key(),
                        manifest.len()
                    );
                    self.version = ManifestVersion::Known(version);
                    self.last_written = Some(body);
                    return if merged {
                        SaveOutcome::Merged
                    } else {
                        SaveOutcome::Saved
                    };
                }
                Err(SyncError::Conflict(_)) => {
                    warn!(
                        "Manifest {} was changed by another writer (attempt {}/{}), merging",
                        self.store.key(),
                        attempt,
                        MAX_SAVE_ATTEMPTS
                    );
                    let remote = self.store.load().await;
                    match &remote.status {
                        LoadStatus::Unavailable(e) => {
                            warn!("Cannot reload manifest for merge: {}", e);
                            return SaveOutcome::Failed(e.clone());
                        }
                        // nothing to merge; replace it with what we have
                        LoadStatus::Corrupt(e) => {
                            warn!("Reloaded manifest is malformed ({}), keeping {} local entries", e, manifest.len());
                        }
                        _ => manifest.rebase_onto(remote.manifest),
                    }
                    self.version = remote.version;
                    self.last_written = None;
                    merged = true;
                }
                Err(e) => {
                    warn!("Failed to save manifest {}: {}", self.store.key(), e);
                    return SaveOutcome::Failed(e.to_string());
                }
            }
        }

        warn!(
            "Giving up on manifest {} after {} conflicting attempts; the next run will re-upload what is missing",
            self.store.key(),
            MAX_SAVE_ATTEMPTS
        );
        SaveOutcome::Conflict
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ManifestEntry;
    use crate::store::{ObjectStoreRemote, PutRequest, RemoteStore};
    use std::sync::Arc;
    use std::time::Duration;

    const KEY: &str = ".upload-manifest.json";

    fn entry(size: u64, digest: &str) -> ManifestEntry {
        ManifestEntry {
            size: Some(size),
            digest: Some(digest.to_string()),
            ..Default::default()
        }
    }

    async fn writer_for(remote: &Arc<dyn RemoteStore>) -> (ManifestWriter, Manifest) {
        let store = ManifestStore::new(remote.clone(), KEY, true, Duration::from_secs(5));
        let loaded = store.load().await;
        (ManifestWriter::new(store, loaded.version), loaded.manifest)
    }

    #[test]
    fn test_persisted_outcomes() {
        assert!(SaveOutcome::Saved.is_persisted());
        assert!(SaveOutcome::Merged.is_persisted());
        assert!(SaveOutcome::Unchanged.is_persisted());
        assert!(!SaveOutcome::Conflict.is_persisted());
        assert!(!SaveOutcome::Failed("timeout".to_string()).is_persisted());
    }

    #[tokio::test]
    async fn test_nothing_to_write() {
        let remote: Arc<dyn RemoteStore> = Arc::new(ObjectStoreRemote::in_memory());
        let (mut writer, mut manifest) = writer_for(&remote).await;

        assert_eq!(writer.persist(&mut manifest).await, SaveOutcome::Unchanged);
        assert!(remote.get(KEY).await.is_err());
    }

    #[tokio::test]
    async fn test_second_identical_write_is_skipped() {
        let remote: Arc<dyn RemoteStore> = Arc::new(ObjectStoreRemote::in_memory());
        let (mut writer, mut manifest) = writer_for(&remote).await;

        manifest.insert("assets/b.js".to_string(), entry(340, "d2"));
        assert_eq!(writer.persist(&mut manifest).await, SaveOutcome::Saved);
        let version = writer.version().clone();

        assert_eq!(writer.persist(&mut manifest).await, SaveOutcome::Unchanged);
        assert_eq!(writer.version(), &version);
    }

    #[tokio::test]
    async fn test_concurrent_writer_is_merged() -> crate::utils::Result<()> {
        let remote: Arc<dyn RemoteStore> = Arc::new(ObjectStoreRemote::in_memory());
        remote
            .put(KEY, Bytes::from_static(br#"{"assets/a.css": {"size": 120, "digest": "d1"}}"#), PutRequest::default())
            .await?;

        let (mut writer, mut manifest) = writer_for(&remote).await;

        // another deploy lands in between
        remote
            .put(
                KEY,
                Bytes::from_static(br#"{"assets/a.css": {"size": 120, "digest": "d1"}, "fonts/f.woff2": {"size": 9, "digest": "d9"}}"#),
                PutRequest::default(),
            )
            .await?;

        manifest.insert("assets/b.js".to_string(), entry(340, "d2"));
        assert_eq!(writer.persist(&mut manifest).await, SaveOutcome::Merged);

        let stored = remote.get(KEY).await?;
        let (saved, _) = Manifest::from_json(&stored.body)?;
        assert!(saved.contains("assets/a.css"));
        assert!(saved.contains("assets/b.js"));
        assert!(saved.contains("fonts/f.woff2"));
        Ok(())
    }

    #[tokio::test]
    async fn test_corrupt_reload_keeps_loaded_entries() -> crate::utils::Result<()> {
        let remote: Arc<dyn RemoteStore> = Arc::new(ObjectStoreRemote::in_memory());
        remote
            .put(
                KEY,
                Bytes::from_static(br#"{"old/1.css": {"size": 1, "digest": "a1"}, "old/2.css": {"size": 2, "digest": "a2"}}"#),
                PutRequest::default(),
            )
            .await?;

        let (mut writer, mut manifest) = writer_for(&remote).await;

        // a broken upload replaces the document after we loaded it
        remote
            .put(KEY, Bytes::from_static(b"<html>garbage"), PutRequest::default())
            .await?;

        manifest.insert("new.js".to_string(), entry(10, "n1"));
        assert_eq!(writer.persist(&mut manifest).await, SaveOutcome::Merged);

        let stored = remote.get(KEY).await?;
        let (saved, _) = Manifest::from_json(&stored.body)?;
        assert_eq!(saved.len(), 3);
        assert!(saved.contains("old/1.css"));
        assert!(saved.contains("old/2.css"));
        assert!(saved.contains("new.js"));
        Ok(())
    }
}

//! Compatibility aliases for fingerprinted images.
//!
//! Older pages reference images under `assets/<name>` while the build now
//! emits them under `_astro/<name>`. After the upload phase each such image is
//! server-side copied to its alias key and the copy is recorded in the manifest
//! with `mappedFrom`.

use crate::config::AliasConfig;
use crate::fs::{ExtensionFilter, FileRecord};
use crate::manifest::{Manifest, ManifestEntry};
use crate::store::{with_timeout, RemoteStore};
use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Default, PartialEq, Eq)]
pub struct AliasReport {
    /// Alias keys created or refreshed
    pub copied: Vec<String>,
    pub failed: usize,

    /// Aliases that would be copied (dry run)
    pub planned: Vec<(String, String)>,
}

pub struct AliasMapper {
    store: Arc<dyn RemoteStore>,
    source_prefix: String,
    target_prefix: String,
    // reuses the exclusion filter as an inclusion set
    extensions: ExtensionFilter,
    timeout: Duration,
    concurrency: usize,
}

impl AliasMapper {
    pub fn new(store: Arc<dyn RemoteStore>, config: &AliasConfig, timeout: Duration, concurrency: usize) -> Self {
        Self {
            store,
            source_prefix: config.source_prefix.clone(),
            target_prefix: config.target_prefix.clone(),
            extensions: ExtensionFilter::new(&config.extensions),
            timeout,
            concurrency: concurrency.max(1),
        }
    }

    /// Alias key for `key`, if it is an aliased image.
    pub fn alias_for(&self, key: &str) -> Option<String> {
        let rest = key.strip_prefix(&self.source_prefix)?;
        if !self.extensions.is_excluded(rest) {
            return None;
        }
        let name = rest.rsplit('/').next()?;
        Some(format!("{}{}", self.target_prefix, name))
    }

    /// Aliases still to be created: the source is recorded in the manifest and
    /// the alias is missing or points at an older copy of the source.
    ///
    /// Each alias key gets one source; the first record claiming it wins.
    fn pending(&self, records: &[FileRecord], manifest: &Manifest) -> Vec<(String, String, ManifestEntry)> {
        let mut pending = Vec::new();
        let mut claimed: HashMap<String, &str> = HashMap::new();

        for record in records {
            let Some(alias) = self.alias_for(&record.key) else {
                continue;
            };
            let Some(source) = manifest.get(&record.key) else {
                // never stored; nothing to copy from
                continue;
            };

            let stale = match manifest.get(&alias) {
                None => true,
                Some(existing) => {
                    existing.mapped_from.as_deref() == Some(record.key.as_str())
                        && existing.digest != source.digest
                }
            };

            if !stale {
                debug!("Alias {} already present", alias);
                continue;
            }
            if let Some(first) = claimed.get(&alias) {
                warn!("Alias {} is claimed by both {} and {}; keeping {}", alias, first, record.key, first);
                continue;
            }
            claimed.insert(alias.clone(), &record.key);
            pending.push((record.key.clone(), alias, source.clone()));
        }

        pending
    }

    pub async fn apply(&self, records: &[FileRecord], manifest: &mut Manifest, dry_run: bool) -> AliasReport {
        let pending = self.pending(records, manifest);
        let mut report = AliasReport::default();

        if pending.is_empty() {
            return report;
        }

        if dry_run {
            report.planned = pending.into_iter().map(|(from, to, _)| (from, to)).collect();
            return report;
        }

        let results: Vec<_> = stream::iter(pending)
            .map(|(from, to, source)| {
                let store = Arc::clone(&self.store);
                let timeout = self.timeout;
                async move {
                    let operation = format!("copy {} -> {}", from, to);
                    let result = with_timeout(timeout, &operation, store.copy(&from, &to)).await;
                    (from, to, source, result)
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for (from, to, source, result) in results {
            match result {
                Ok(()) => {
                    info!("Alias {} -> {}", from, to);
                    report.copied.push(to.clone());
                    manifest.insert(
                        to,
                        ManifestEntry {
                            size: source.size,
                            digest: source.digest,
                            mtime: source.mtime,
                            uploaded_at: Some(Utc::now()),
                            mapped_from: Some(from),
                            legacy: false,
                        },
                    );
                }
                Err(e) => {
                    warn!("Failed to create alias {} -> {}: {}", from, to, e);
                    report.failed += 1;
                }
            }
        }

        info!("Created {} aliases ({} failed)", report.copied.len(), report.failed);
        report
    }
}

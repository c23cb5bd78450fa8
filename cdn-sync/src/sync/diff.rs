//! Local-vs-manifest classification.
//!
//! Every scanned file is classified as NEW, CHANGED, UNCHANGED or SKIP. The
//! cheap checks (extension, presence, size) always run first; only when sizes
//! agree is the configured [`ComparisonStrategy`] consulted.

use crate::fs::{digest_file, ExtensionFilter, FileRecord};
use crate::manifest::{Manifest, ManifestEntry};
use crate::utils::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Named comparison strategies, selectable from config or the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Equal size means unchanged; never reads file contents
    Size,

    /// Hash every same-sized file and compare digests
    Digest,

    /// Trust a matching recorded mtime, hash otherwise
    MtimeHint,
}

impl Strategy {
    pub fn comparator(self) -> Arc<dyn ComparisonStrategy> {
        match self {
            Strategy::Size => Arc::new(SizeOnly),
            Strategy::Digest => Arc::new(DigestCompare),
            Strategy::MtimeHint => Arc::new(MtimeHint),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadDecision {
    New,
    Changed,
    Unchanged,
    Skip,
}

impl UploadDecision {
    pub fn needs_upload(self) -> bool {
        matches!(self, UploadDecision::New | UploadDecision::Changed)
    }
}

/// Result of a strategy comparison; carries the digest if one was computed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub decision: UploadDecision,
    pub digest: Option<String>,
}

impl Verdict {
    fn unchanged(digest: Option<String>) -> Self {
        Self {
            decision: UploadDecision::Unchanged,
            digest,
        }
    }

    fn changed(digest: Option<String>) -> Self {
        Self {
            decision: UploadDecision::Changed,
            digest,
        }
    }
}

/// Decides whether a file whose size matches its manifest entry (or whose
/// entry has no size) has changed.
pub trait ComparisonStrategy: Send + Sync {
    fn decide(&self, local: &FileRecord, remote: &ManifestEntry) -> io::Result<Verdict>;
}

pub struct SizeOnly;

impl ComparisonStrategy for SizeOnly {
    fn decide(&self, local: &FileRecord, remote: &ManifestEntry) -> io::Result<Verdict> {
        Ok(match remote.size {
            Some(size) if size == local.size => Verdict::unchanged(None),
            _ => Verdict::changed(None),
        })
    }
}

pub struct DigestCompare;

impl ComparisonStrategy for DigestCompare {
    fn decide(&self, local: &FileRecord, remote: &ManifestEntry) -> io::Result<Verdict> {
        let digest = match &local.digest {
            Some(digest) => digest.clone(),
            None => digest_file(&local.path)?,
        };

        let matches = remote
            .digest
            .as_deref()
            .map(|recorded| recorded.trim_matches('"').eq_ignore_ascii_case(&digest))
            .unwrap_or(false);

        Ok(if matches {
            Verdict::unchanged(Some(digest))
        } else {
            Verdict::changed(Some(digest))
        })
    }
}

pub struct MtimeHint;

impl ComparisonStrategy for MtimeHint {
    fn decide(&self, local: &FileRecord, remote: &ManifestEntry) -> io::Result<Verdict> {
        let same_mtime = match (local.modified_at, remote.mtime) {
            (Some(local_mtime), Some(recorded)) => local_mtime.timestamp() == recorded.timestamp(),
            _ => false,
        };

        if same_mtime && remote.size == Some(local.size) {
            return Ok(Verdict::unchanged(None));
        }

        // a differing mtime proves nothing after a fresh checkout
        DigestCompare.decide(local, remote)
    }
}

/// A scanned file and what to do with it.
#[derive(Debug, Clone)]
pub struct Classified {
    pub record: FileRecord,
    pub decision: UploadDecision,
}

/// Output of diffing a whole scan.
#[derive(Debug, Default)]
pub struct DiffPlan {
    /// NEW and CHANGED files in scan order
    pub uploads: Vec<Classified>,
    pub new: usize,
    pub changed: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub unchanged_bytes: u64,

    /// Manifest keys with no local file; left untouched
    pub remote_only: usize,
}

impl DiffPlan {
    pub fn upload_bytes(&self) -> u64 {
        self.uploads.iter().map(|c| c.record.size).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.uploads.is_empty()
    }
}

#[derive(Clone)]
pub struct DiffEngine {
    comparator: Arc<dyn ComparisonStrategy>,
    filter: ExtensionFilter,
}

impl DiffEngine {
    pub fn new(strategy: Strategy, filter: ExtensionFilter) -> Self {
        Self::with_strategy(strategy.comparator(), filter)
    }

    pub fn with_strategy(comparator: Arc<dyn ComparisonStrategy>, filter: ExtensionFilter) -> Self {
        Self { comparator, filter }
    }

    pub fn classify(&self, record: FileRecord, manifest: &Manifest) -> Classified {
        if self.filter.is_excluded(&record.key) {
            return Classified {
                record,
                decision: UploadDecision::Skip,
            };
        }

        let Some(entry) = manifest.get(&record.key) else {
            return Classified {
                record,
                decision: UploadDecision::New,
            };
        };

        if let Some(size) = entry.size {
            if size != record.size {
                debug!("{}: size {} -> {}", record.key, size, record.size);
                return Classified {
                    record,
                    decision: UploadDecision::Changed,
                };
            }
        }

        match self.comparator.decide(&record, entry) {
            Ok(verdict) => {
                let record = match verdict.digest {
                    Some(digest) if record.digest.is_none() => record.with_digest(digest),
                    _ => record,
                };
                Classified {
                    record,
                    decision: verdict.decision,
                }
            }
            Err(e) => {
                warn!("Cannot compare {} ({}), treating as changed", record.path.display(), e);
                Classified {
                    record,
                    decision: UploadDecision::Changed,
                }
            }
        }
    }

    /// Classify every record. Hashes files, so call from a blocking context.
    pub fn plan(&self, records: Vec<FileRecord>, manifest: &Manifest) -> DiffPlan {
        let mut plan = DiffPlan::default();
        let mut local_keys = HashSet::with_capacity(records.len());

        for record in records {
            local_keys.insert(record.key.clone());
            let classified = self.classify(record, manifest);

            match classified.decision {
                UploadDecision::New => plan.new += 1,
                UploadDecision::Changed => plan.changed += 1,
                UploadDecision::Unchanged => {
                    plan.unchanged += 1;
                    plan.unchanged_bytes += classified.record.size;
                    continue;
                }
                UploadDecision::Skip => {
                    plan.skipped += 1;
                    continue;
                }
            }
            plan.uploads.push(classified);
        }

        plan.remote_only = manifest
            .iter()
            .filter(|(key, _)| !local_keys.contains(key.as_str()))
            .count();

        info!(
            "Diff: {} new, {} changed, {} unchanged, {} skipped, {} only in manifest",
            plan.new, plan.changed, plan.unchanged, plan.skipped, plan.remote_only
        );
        plan
    }

    /// [`plan`](Self::plan) on the blocking pool.
    pub async fn diff(&self, records: Vec<FileRecord>, manifest: &Manifest) -> Result<DiffPlan> {
        let engine = self.clone();
        let manifest = manifest.clone();
        let plan = tokio::task::spawn_blocking(move || engine.plan(records, &manifest)).await?;
        Ok(plan)
    }
}

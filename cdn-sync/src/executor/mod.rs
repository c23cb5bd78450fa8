//! Reconciliation run - Orchestrates one scan → diff → upload → save cycle.
//!
//! This module ties together:
//! - Local file scanning
//! - Manifest load and conditional save
//! - Diffing with the configured comparison strategy
//! - Batched uploads and alias copies

pub mod alias;
pub mod uploader;

use crate::config::{AliasConfig, Config};
use crate::fs::{scan, ScanOptions, ScanReport};
use crate::manifest::{LoadStatus, ManifestStore, ManifestWriter, SaveOutcome};
use crate::store::RemoteStore;
use crate::sync::{DiffEngine, Strategy};
use crate::utils::{Result, SyncError};
use alias::{AliasMapper, AliasReport};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::info;
use uploader::{BatchUploader, UploadOptions, UploadReport};

/// Stages of a run, in order. `UploadBatches` may repeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Scan,
    LoadManifest,
    Diff,
    UploadBatches,
    SaveManifest,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Scan => "scan",
            Phase::LoadManifest => "load-manifest",
            Phase::Diff => "diff",
            Phase::UploadBatches => "upload-batches",
            Phase::SaveManifest => "save-manifest",
            Phase::Done => "done",
        };
        f.write_str(name)
    }
}

/// Everything one run needs besides the store.
#[derive(Debug, Clone)]
pub struct SyncJob {
    pub scan: ScanOptions,
    pub strategy: Strategy,
    pub upload: UploadOptions,
    pub manifest_key: String,
    pub conditional_save: bool,

    /// `None` disables alias copies
    pub aliases: Option<AliasConfig>,

    /// Classify only; write nothing
    pub dry_run: bool,
}

impl SyncJob {
    pub fn from_config(config: &Config, dry_run: bool) -> Self {
        Self {
            scan: ScanOptions::from_config(&config.scan),
            strategy: config.upload.strategy,
            upload: UploadOptions::from_config(&config.upload),
            manifest_key: config.storage.manifest_key.clone(),
            conditional_save: config.storage.conditional_save,
            aliases: config.aliases.enabled.then(|| config.aliases.clone()),
            dry_run,
        }
    }
}

/// Everything the final report needs.
#[derive(Debug)]
pub struct RunSummary {
    pub scanned: usize,
    pub scanned_bytes: u64,
    pub excluded: usize,
    pub duplicates: usize,
    pub scan_errors: usize,
    pub missing_roots: usize,

    pub manifest_status: LoadStatus,

    pub new: usize,
    pub changed: usize,
    pub unchanged: usize,
    pub unchanged_bytes: u64,
    pub remote_only: usize,

    pub upload: UploadReport,
    pub aliases: AliasReport,

    /// Final manifest save; `None` when skipped
    pub save: Option<SaveOutcome>,

    /// Keys a dry run would upload
    pub planned: Vec<String>,
    pub planned_bytes: u64,

    pub dry_run: bool,
    pub elapsed: Duration,
}

impl RunSummary {
    fn from_scan(report: &ScanReport, manifest_status: LoadStatus, dry_run: bool) -> Self {
        Self {
            scanned: report.records.len(),
            scanned_bytes: report.total_bytes(),
            excluded: report.excluded,
            duplicates: report.duplicates,
            scan_errors: report.errors,
            missing_roots: report.missing_roots.len(),
            manifest_status,
            new: 0,
            changed: 0,
            unchanged: 0,
            unchanged_bytes: 0,
            remote_only: 0,
            upload: UploadReport::default(),
            aliases: AliasReport::default(),
            save: None,
            planned: Vec::new(),
            planned_bytes: 0,
            dry_run,
            elapsed: Duration::ZERO,
        }
    }

    /// Uploaded keys plus alias copies: what a CDN purge should cover.
    pub fn changed_keys(&self) -> Vec<String> {
        self.upload
            .changed_keys
            .iter()
            .chain(self.aliases.copied.iter())
            .cloned()
            .collect()
    }
}

fn enter(phase: Phase) {
    info!("Phase: {}", phase);
}

pub struct Reconciler {
    store: Arc<dyn RemoteStore>,
    cancel: CancellationToken,
}

impl Reconciler {
    pub fn new(store: Arc<dyn RemoteStore>, cancel: CancellationToken) -> Self {
        Self { store, cancel }
    }

    /// Run one reconciliation pass.
    ///
    /// Fails only when the base directory is missing or a blocking task dies;
    /// per-file and manifest problems are reported in the summary instead.
    pub async fn run(&self, job: SyncJob) -> Result<RunSummary> {
        let start_time = Instant::now();

        if !job.scan.base_dir.is_dir() {
            return Err(SyncError::Config(format!(
                "base directory {} does not exist",
                job.scan.base_dir.display()
            )));
        }

        enter(Phase::Scan);
        let scan_options = job.scan.clone();
        let scanned = tokio::task::spawn_blocking(move || scan(&scan_options)).await?;

        enter(Phase::LoadManifest);
        let manifest_store = ManifestStore::new(
            Arc::clone(&self.store),
            job.manifest_key.clone(),
            job.conditional_save,
            job.upload.timeout,
        );
        let loaded = manifest_store.load().await;
        let mut manifest = loaded.manifest;
        let mut summary = RunSummary::from_scan(&scanned, loaded.status, job.dry_run);

        enter(Phase::Diff);
        let records = scanned.records;
        let engine = DiffEngine::new(job.strategy, job.scan.exclude.clone());
        let plan = engine.diff(records.clone(), &manifest).await?;

        summary.new = plan.new;
        summary.changed = plan.changed;
        summary.unchanged = plan.unchanged;
        summary.unchanged_bytes = plan.unchanged_bytes;
        summary.remote_only = plan.remote_only;
        summary.upload.skipped = plan.skipped;

        let mapper = job.aliases.as_ref().map(|config| {
            AliasMapper::new(Arc::clone(&self.store), config, job.upload.timeout, job.upload.batch_size)
        });

        if job.dry_run {
            summary.planned_bytes = plan.upload_bytes();
            summary.planned = plan.uploads.into_iter().map(|c| c.record.key).collect();
            if let Some(mapper) = &mapper {
                summary.aliases = mapper.apply(&records, &mut manifest, true).await;
            }
            info!("Dry run: {} files would be uploaded", summary.planned.len());
            enter(Phase::Done);
            summary.elapsed = start_time.elapsed();
            return Ok(summary);
        }

        let mut writer = ManifestWriter::new(manifest_store, loaded.version);

        if !plan.is_empty() {
            enter(Phase::UploadBatches);
            let uploader = BatchUploader::new(Arc::clone(&self.store), job.upload.clone(), self.cancel.clone());
            let skipped = summary.upload.skipped;
            summary.upload = uploader.upload(plan.uploads, &mut manifest, &mut writer).await;
            summary.upload.skipped += skipped;
        }

        if let Some(mapper) = &mapper {
            if !summary.upload.interrupted {
                summary.aliases = mapper.apply(&records, &mut manifest, false).await;
            }
        }

        if manifest.has_changes() {
            enter(Phase::SaveManifest);
            summary.save = Some(writer.persist(&mut manifest).await);
        } else {
            info!("Manifest unchanged, skipping save");
        }

        enter(Phase::Done);
        summary.elapsed = start_time.elapsed();
        Ok(summary)
    }
}

//! `upload`: scan, diff, upload and save the manifest.

use super::open_store;
use crate::config::Config;
use crate::executor::{Reconciler, SyncJob};
use crate::sync::Strategy;
use crate::transfer::report::print_summary;
use crate::utils::shutdown::ShutdownCoordinator;
use crate::utils::Result;
use clap::Args;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Args, Debug, Default)]
pub struct UploadArgs {
    /// Build output directory (overrides config)
    #[arg(long, value_name = "DIR")]
    pub base_dir: Option<PathBuf>,

    /// Directory to scan; repeatable, replaces the configured roots
    #[arg(long = "root", value_name = "DIR")]
    pub roots: Vec<PathBuf>,

    /// Bucket name (overrides config and environment)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Bucket region
    #[arg(long)]
    pub region: Option<String>,

    /// Comparison strategy for same-sized files
    #[arg(long, value_enum)]
    pub strategy: Option<Strategy>,

    /// Files uploaded concurrently per batch
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Retries per file after the first failure
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Classify and report without writing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Do not create `_astro/` → `assets/` image aliases
    #[arg(long)]
    pub no_aliases: bool,
}

impl UploadArgs {
    /// Apply command-line overrides on top of file and environment settings.
    pub fn apply(&self, config: &mut Config) {
        if let Some(dir) = &self.base_dir {
            config.scan.base_dir = dir.clone();
        }
        if !self.roots.is_empty() {
            config.scan.roots = self.roots.clone();
        }
        if let Some(bucket) = &self.bucket {
            config.storage.bucket = Some(bucket.clone());
        }
        if let Some(region) = &self.region {
            config.storage.region = region.clone();
        }
        if let Some(strategy) = self.strategy {
            config.upload.strategy = strategy;
        }
        if let Some(batch_size) = self.batch_size {
            config.upload.batch_size = batch_size;
        }
        if let Some(max_retries) = self.max_retries {
            config.upload.max_retries = max_retries;
        }
        if self.no_aliases {
            config.aliases.enabled = false;
        }
    }
}

/// Run one reconciliation. Per-file failures are reported, not returned.
pub async fn run(config: &Config, args: &UploadArgs) -> Result<()> {
    config.validate_upload()?;
    let store = open_store(config)?;

    info!(
        "Syncing {} to bucket {} ({:?} strategy, batches of {})",
        config.scan.base_dir.display(),
        config.storage.bucket.as_deref().unwrap_or_default(),
        config.upload.strategy,
        config.upload.batch_size
    );
    if let Some(url) = config.storage.object_url(&config.storage.manifest_key) {
        info!("Manifest: {}", url);
    }

    let shutdown = ShutdownCoordinator::new();
    let listener = shutdown.listen();

    let result = Reconciler::new(store, shutdown.token())
        .run(SyncJob::from_config(config, args.dry_run))
        .await;

    shutdown.finish();
    let _ = listener.await;

    let summary = result?;
    print_summary(&summary, &config.cdn);

    if !summary.upload.failed.is_empty() {
        warn!(
            "{} files failed to upload; they are not in the manifest and will be retried next run",
            summary.upload.failed.len()
        );
    }
    if let Some(save) = summary.save.as_ref().filter(|s| !s.is_persisted()) {
        warn!("Manifest was not saved ({:?}); the next run will re-upload this run's files", save);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides() {
        let mut config = Config::default();
        let args = UploadArgs {
            base_dir: Some(PathBuf::from("build")),
            roots: vec![PathBuf::from("static")],
            bucket: Some("site-1250000000".to_string()),
            strategy: Some(Strategy::MtimeHint),
            batch_size: Some(5),
            no_aliases: true,
            ..Default::default()
        };
        args.apply(&mut config);

        assert_eq!(config.scan.base_dir, PathBuf::from("build"));
        assert_eq!(config.scan.roots, vec![PathBuf::from("static")]);
        assert_eq!(config.storage.bucket.as_deref(), Some("site-1250000000"));
        assert_eq!(config.upload.strategy, Strategy::MtimeHint);
        assert_eq!(config.upload.batch_size, 5);
        assert_eq!(config.upload.max_retries, 2);
        assert!(!config.aliases.enabled);
    }

    #[test]
    fn test_no_overrides_keep_config() {
        let mut config = Config::default();
        UploadArgs::default().apply(&mut config);
        assert_eq!(config.scan.roots.len(), 8);
        assert!(config.aliases.enabled);
    }
}

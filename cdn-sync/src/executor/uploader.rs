//! Batched, retried uploads.
//!
//! Batches run strictly one after another; the files of one batch upload
//! concurrently. The manifest is updated (and optionally persisted) after each
//! batch, so an interrupted run keeps everything that finished.

use crate::config::UploadConfig;
use crate::fs::{digest_bytes, FileRecord};
use crate::manifest::{Manifest, ManifestWriter, SaveOutcome};
use crate::store::{with_timeout, PutRequest, RemoteStore, WriteCondition};
use crate::sync::Classified;
use crate::transfer::progress::{format_bytes, format_duration, format_speed, ProgressTracker};
use crate::utils::SyncError;
use bytes::Bytes;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub batch_size: usize,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub timeout: Duration,
    pub cache_control: String,
    pub save_each_batch: bool,
}

impl UploadOptions {
    pub fn from_config(config: &UploadConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
            retry_delay: config.retry_delay(),
            timeout: config.timeout(),
            cache_control: config.cache_control.clone(),
            save_each_batch: config.save_each_batch,
        }
    }
}

/// Outcome of the upload phase
#[derive(Debug, Default)]
pub struct UploadReport {
    pub uploaded: usize,
    pub uploaded_bytes: u64,

    /// Keys that failed after all retries
    pub failed: Vec<String>,

    /// Classified files that needed no upload
    pub skipped: usize,

    /// Files left over when the run was interrupted
    pub not_attempted: usize,

    pub batches: usize,
    pub interrupted: bool,

    /// Keys stored by this run, in upload order
    pub changed_keys: Vec<String>,

    /// Result of the most recent per-batch save
    pub last_save: Option<SaveOutcome>,
}

struct Uploaded {
    size: u64,
    digest: String,
    attempts: u32,
}

struct FileOutcome {
    record: FileRecord,
    result: Result<Uploaded, SyncError>,
}

pub struct BatchUploader {
    store: Arc<dyn RemoteStore>,
    options: Arc<UploadOptions>,
    cancel: CancellationToken,
}

impl BatchUploader {
    pub fn new(store: Arc<dyn RemoteStore>, options: UploadOptions, cancel: CancellationToken) -> Self {
        Self {
            store,
            options: Arc::new(options),
            cancel,
        }
    }

    /// Upload every NEW/CHANGED file, merging results into `manifest`.
    pub async fn upload(
        &self,
        classified: Vec<Classified>,
        manifest: &mut Manifest,
        writer: &mut ManifestWriter,
    ) -> UploadReport {
        let mut report = UploadReport::default();

        let pending: Vec<FileRecord> = classified
            .into_iter()
            .filter_map(|c| {
                if c.decision.needs_upload() {
                    Some(c.record)
                } else {
                    report.skipped += 1;
                    None
                }
            })
            .collect();

        if pending.is_empty() {
            return report;
        }

        let total_bytes: u64 = pending.iter().map(|r| r.size).sum();
        let mut tracker = ProgressTracker::new(total_bytes, pending.len());
        let batch_count = pending.len().div_ceil(self.options.batch_size);

        info!(
            "Uploading {} files ({}) in {} batches of up to {}",
            pending.len(),
            format_bytes(total_bytes),
            batch_count,
            self.options.batch_size
        );

        for (index, batch) in pending.chunks(self.options.batch_size).enumerate() {
            if self.cancel.is_cancelled() {
                report.interrupted = true;
                report.not_attempted = pending.len() - index * self.options.batch_size;
                warn!(
                    "Interrupted before batch {}/{}; {} files not attempted",
                    index + 1,
                    batch_count,
                    report.not_attempted
                );
                break;
            }

            let mut handles = Vec::with_capacity(batch.len());
            for record in batch {
                let store = Arc::clone(&self.store);
                let options = Arc::clone(&self.options);
                let record = record.clone();
                let key = record.key.clone();
                handles.push((key, tokio::spawn(upload_file(store, options, record))));
            }

            let mut stored_in_batch = 0;
            for (key, handle) in handles {
                let outcome = match handle.await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        warn!("Upload task for {} panicked: {}", key, e);
                        report.failed.push(key);
                        tracker.file_failed();
                        continue;
                    }
                };

                match outcome.result {
                    Ok(uploaded) => {
                        if uploaded.attempts > 1 {
                            info!("Uploaded {} after {} attempts", outcome.record.key, uploaded.attempts);
                        } else {
                            info!("Uploaded {} ({})", outcome.record.key, format_bytes(uploaded.size));
                        }
                        manifest.record_upload(&outcome.record, uploaded.size, uploaded.digest, Utc::now());
                        report.uploaded += 1;
                        report.uploaded_bytes += uploaded.size;
                        report.changed_keys.push(outcome.record.key);
                        tracker.file_uploaded(uploaded.size);
                        stored_in_batch += 1;
                    }
                    Err(e) => {
                        warn!("Failed to upload {}: {}", outcome.record.key, e);
                        report.failed.push(outcome.record.key);
                        tracker.file_failed();
                    }
                }
            }
            report.batches += 1;

            let progress = tracker.progress();
            info!(
                "Batch {}/{} done: {}/{} files, {:.1}%, {}, ETA {}",
                index + 1,
                batch_count,
                progress.files_processed,
                progress.total_files,
                progress.percent_complete,
                format_speed(tracker.average_speed()),
                format_duration(tracker.eta_seconds())
            );

            if self.options.save_each_batch && stored_in_batch > 0 {
                report.last_save = Some(writer.persist(manifest).await);
            }
        }

        report
    }
}

/// Read, hash and store one file with retries.
async fn upload_file(store: Arc<dyn RemoteStore>, options: Arc<UploadOptions>, record: FileRecord) -> FileOutcome {
    let body = match tokio::fs::read(&record.path).await {
        Ok(body) => Bytes::from(body),
        Err(e) => {
            // local problem; retrying will not help
            return FileOutcome {
                record,
                result: Err(SyncError::Io(e)),
            };
        }
    };

    let digest = record.digest.clone().unwrap_or_else(|| digest_bytes(&body));
    let request = PutRequest {
        cache_control: Some(options.cache_control.clone()),
        content_type: Some(content_type_for(&record.key)),
        condition: WriteCondition::Overwrite,
    };
    let operation = format!("upload {}", record.key);

    let mut attempt = 0;
    let result = loop {
        attempt += 1;
        let put = store.put(&record.key, body.clone(), request.clone());
        match with_timeout(options.timeout, &operation, put).await {
            Ok(_) => {
                break Ok(Uploaded {
                    size: body.len() as u64,
                    digest,
                    attempts: attempt,
                })
            }
            Err(e) if e.is_retryable() && attempt <= options.max_retries => {
                let delay = options.retry_delay * attempt;
                warn!(
                    "Upload of {} failed (attempt {}/{}): {}; retrying in {:?}",
                    record.key,
                    attempt,
                    options.max_retries + 1,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => break Err(e),
        }
    };

    FileOutcome { record, result }
}

/// Content type from the key's extension.
pub fn content_type_for(key: &str) -> String {
    mime_guess::from_path(key).first_or_octet_stream().to_string()
}

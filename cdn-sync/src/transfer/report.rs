//! End-of-run summary printed to stdout.

use super::progress::{format_bytes, format_duration, format_speed};
use crate::config::CdnConfig;
use crate::executor::RunSummary;
use crate::manifest::{LoadStatus, SaveOutcome};
use std::fmt::Write;

/// Purge hints list at most this many URLs.
const MAX_PURGE_HINTS: usize = 20;

fn manifest_line(status: &LoadStatus) -> String {
    match status {
        LoadStatus::Loaded { entries, dropped: 0 } => format!("{} entries", entries),
        LoadStatus::Loaded { entries, dropped } => {
            format!("{} entries ({} unreadable entries ignored)", entries, dropped)
        }
        LoadStatus::Missing => "not found, starting fresh".to_string(),
        LoadStatus::Corrupt(e) => format!("malformed ({}), starting fresh", e),
        LoadStatus::Unavailable(e) => format!("unavailable ({}), starting fresh", e),
    }
}

fn save_line(save: &Option<SaveOutcome>) -> &str {
    match save {
        None => "skipped (no changes)",
        Some(SaveOutcome::Saved) => "saved",
        Some(SaveOutcome::Merged) => "saved (merged with a concurrent update)",
        Some(SaveOutcome::Unchanged) => "up to date",
        Some(SaveOutcome::Conflict) => "NOT saved (concurrent updates)",
        Some(SaveOutcome::Failed(_)) => "NOT saved (write failed)",
    }
}

/// Render the summary as text.
pub fn render(summary: &RunSummary, cdn: &CdnConfig) -> String {
    let mut out = String::new();
    let elapsed = summary.elapsed.as_secs_f64();

    let _ = writeln!(out, "\n=== cdn-sync {}===", if summary.dry_run { "(dry run) " } else { "" });
    let _ = writeln!(
        out,
        "Scanned:    {} files ({}), {} excluded, {} duplicates, {} errors",
        summary.scanned,
        format_bytes(summary.scanned_bytes),
        summary.excluded,
        summary.duplicates,
        summary.scan_errors
    );
    let _ = writeln!(out, "Manifest:   {}", manifest_line(&summary.manifest_status));
    let _ = writeln!(
        out,
        "Diff:       {} new, {} changed, {} unchanged ({}), {} only in manifest",
        summary.new,
        summary.changed,
        summary.unchanged,
        format_bytes(summary.unchanged_bytes),
        summary.remote_only
    );

    if summary.dry_run {
        let _ = writeln!(
            out,
            "Would upload {} files ({})",
            summary.planned.len(),
            format_bytes(summary.planned_bytes)
        );
        for key in &summary.planned {
            let _ = writeln!(out, "  + {}", key);
        }
        for (from, to) in &summary.aliases.planned {
            let _ = writeln!(out, "  = {} -> {}", from, to);
        }
        return out;
    }

    let upload = &summary.upload;
    let speed = if elapsed > 0.0 {
        (upload.uploaded_bytes as f64 / elapsed) as u64
    } else {
        0
    };
    let _ = writeln!(
        out,
        "Uploaded:   {} files ({}) in {} batches, {} skipped, {} failed",
        upload.uploaded,
        format_bytes(upload.uploaded_bytes),
        upload.batches,
        upload.skipped,
        upload.failed.len()
    );
    if !summary.aliases.copied.is_empty() || summary.aliases.failed > 0 {
        let _ = writeln!(
            out,
            "Aliases:    {} created, {} failed",
            summary.aliases.copied.len(),
            summary.aliases.failed
        );
    }
    if upload.interrupted {
        let _ = writeln!(out, "Interrupted: {} files not attempted", upload.not_attempted);
    }
    let _ = writeln!(out, "Manifest:   {}", save_line(&summary.save));
    let _ = writeln!(
        out,
        "Elapsed:    {} ({})",
        format_duration(summary.elapsed.as_secs()),
        format_speed(speed)
    );

    if !upload.failed.is_empty() {
        let _ = writeln!(out, "\nFailed files (will be retried on the next run):");
        for key in &upload.failed {
            let _ = writeln!(out, "  - {}", key);
        }
    }

    let hints = purge_hints(&summary.changed_keys(), cdn);
    if !hints.is_empty() {
        let _ = writeln!(out, "\nCDN refresh candidates:");
        for url in &hints {
            let _ = writeln!(out, "  {}", url);
        }
        let remaining = summary.changed_keys().len().saturating_sub(hints.len());
        if remaining > 0 {
            let _ = writeln!(out, "  ... and {} more", remaining);
        }
    }

    out
}

/// CDN URLs worth purging after `keys` changed. Empty without a CDN domain.
pub fn purge_hints(keys: &[String], cdn: &CdnConfig) -> Vec<String> {
    keys.iter()
        .take(MAX_PURGE_HINTS)
        .filter_map(|key| cdn.url_for(key))
        .collect()
}

pub fn print_summary(summary: &RunSummary, cdn: &CdnConfig) {
    print!("{}", render(summary, cdn));
}

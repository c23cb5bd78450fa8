//! Upload progress accounting.
//!
//! Tracks completed files and bytes across batches so each batch can log an
//! overall percentage, throughput and estimate.

use std::time::{Duration, Instant};

/// Snapshot of upload progress
#[derive(Debug, Clone, PartialEq)]
pub struct TransferProgress {
    /// Total bytes planned for upload
    pub total_bytes: u64,

    /// Bytes uploaded so far
    pub transferred_bytes: u64,

    /// Number of files finished (uploaded or failed)
    pub files_processed: usize,

    /// Number of files that failed
    pub files_failed: usize,

    /// Total number of files planned
    pub total_files: usize,

    /// Percentage of bytes complete (0-100)
    pub percent_complete: f64,
}

impl TransferProgress {
    pub fn new(total_bytes: u64, total_files: usize) -> Self {
        Self {
            total_bytes,
            transferred_bytes: 0,
            files_processed: 0,
            files_failed: 0,
            total_files,
            percent_complete: 0.0,
        }
    }

    fn refresh_percent(&mut self) {
        self.percent_complete = if self.total_bytes > 0 {
            ((self.transferred_bytes as f64 / self.total_bytes as f64) * 100.0).min(100.0)
        } else if self.files_processed >= self.total_files {
            100.0
        } else {
            0.0
        };
    }

    pub fn is_complete(&self) -> bool {
        self.files_processed >= self.total_files
    }
}

/// Progress tracker with time-based speed calculation
pub struct ProgressTracker {
    start_time: Instant,
    progress: TransferProgress,
}

impl ProgressTracker {
    pub fn new(total_bytes: u64, total_files: usize) -> Self {
        Self {
            start_time: Instant::now(),
            progress: TransferProgress::new(total_bytes, total_files),
        }
    }

    /// Count one uploaded file.
    pub fn file_uploaded(&mut self, bytes: u64) -> &TransferProgress {
        self.progress.transferred_bytes += bytes;
        self.progress.files_processed += 1;
        self.progress.refresh_percent();
        &self.progress
    }

    /// Count one failed file; its bytes still count as planned.
    pub fn file_failed(&mut self) -> &TransferProgress {
        self.progress.files_processed += 1;
        self.progress.files_failed += 1;
        self.progress.refresh_percent();
        &self.progress
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Average speed since start
    pub fn average_speed(&self) -> u64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            (self.progress.transferred_bytes as f64 / elapsed) as u64
        } else {
            0
        }
    }

    /// Seconds left at the average speed so far
    pub fn eta_seconds(&self) -> u64 {
        let speed = self.average_speed();
        if speed == 0 {
            return 0;
        }
        self.progress
            .total_bytes
            .saturating_sub(self.progress.transferred_bytes)
            / speed
    }

    pub fn progress(&self) -> &TransferProgress {
        &self.progress
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Format speed as human-readable string
pub fn format_speed(bytes_per_second: u64) -> String {
    format!("{}/s", format_bytes(bytes_per_second))
}

/// Format duration as human-readable string
pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}

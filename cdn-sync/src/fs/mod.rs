//! Local build output: scanning and digests.

pub mod digest;
pub mod walker;

pub use digest::{digest_bytes, digest_file};
pub use walker::{scan, ExtensionFilter, FileRecord, ScanOptions, ScanReport};

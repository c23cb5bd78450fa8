//! `verify`: compare the manifest with a bucket listing.

use super::{load_manifest, open_store};
use crate::config::Config;
use crate::store::with_timeout;
use crate::sync::{compare, DriftReport};
use crate::utils::Result;
use std::fmt::Write;
use tracing::info;

pub async fn run(config: &Config, prefix: Option<&str>) -> Result<()> {
    let store = open_store(config)?;
    let loaded = load_manifest(config, store.clone()).await;

    info!("Listing bucket{}", prefix.map(|p| format!(" under {}", p)).unwrap_or_default());
    let listing = with_timeout(config.upload.timeout(), "list", store.list(prefix)).await?;

    let report = compare(&loaded.manifest, &listing, &config.storage.manifest_key, prefix);
    print!("{}", render(&report));
    Ok(())
}

pub fn render(report: &DriftReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Checked {} manifest entries", report.checked);

    if report.is_clean() {
        let _ = writeln!(out, "No drift: every manifest entry matches the bucket");
    }
    if !report.missing_remote.is_empty() {
        let _ = writeln!(out, "Missing in bucket ({}):", report.missing_remote.len());
        for key in &report.missing_remote {
            let _ = writeln!(out, "  - {}", key);
        }
    }
    if !report.size_mismatch.is_empty() {
        let _ = writeln!(out, "Size mismatch ({}):", report.size_mismatch.len());
        for (key, recorded, remote) in &report.size_mismatch {
            let _ = writeln!(out, "  ~ {} (manifest {}, bucket {})", key, recorded, remote);
        }
    }
    if !report.digest_mismatch.is_empty() {
        let _ = writeln!(out, "Content mismatch ({}):", report.digest_mismatch.len());
        for key in &report.digest_mismatch {
            let _ = writeln!(out, "  ~ {}", key);
        }
    }
    if !report.untracked.is_empty() {
        let _ = writeln!(out, "{} objects in the bucket are not in the manifest", report.untracked.len());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_clean_and_dirty() {
        let clean = DriftReport {
            checked: 3,
            ..Default::default()
        };
        assert!(render(&clean).contains("No drift"));

        let dirty = DriftReport {
            missing_remote: vec!["fonts/f.woff2".to_string()],
            size_mismatch: vec![("assets/b.js".to_string(), 340, 300)],
            checked: 2,
            ..Default::default()
        };
        let text = render(&dirty);
        assert!(!text.contains("No drift"));
        assert!(text.contains("  - fonts/f.woff2"));
        assert!(text.contains("manifest 340, bucket 300"));
    }
}

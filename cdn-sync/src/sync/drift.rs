//! Drift between the manifest and what the bucket actually holds.

use crate::manifest::Manifest;
use crate::store::RemoteMeta;
use std::collections::HashMap;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct DriftReport {
    /// Manifest keys with no remote object
    pub missing_remote: Vec<String>,

    /// (key, recorded size, remote size)
    pub size_mismatch: Vec<(String, u64, u64)>,

    /// Keys whose single-part ETag contradicts the recorded digest
    pub digest_mismatch: Vec<String>,

    /// Remote objects the manifest does not know about
    pub untracked: Vec<String>,

    pub checked: usize,
}

impl DriftReport {
    pub fn is_clean(&self) -> bool {
        self.missing_remote.is_empty() && self.size_mismatch.is_empty() && self.digest_mismatch.is_empty()
    }
}

/// An S3 ETag equals the content MD5 only for single-part uploads.
fn etag_as_md5(e_tag: &str) -> Option<&str> {
    let tag = e_tag.trim_matches('"');
    (tag.len() == 32 && tag.bytes().all(|b| b.is_ascii_hexdigit())).then_some(tag)
}

/// Compare manifest entries against a remote listing.
///
/// `prefix` limits which manifest keys are expected to appear in `listing`.
pub fn compare(manifest: &Manifest, listing: &[RemoteMeta], manifest_key: &str, prefix: Option<&str>) -> DriftReport {
    let remote: HashMap<&str, &RemoteMeta> = listing.iter().map(|m| (m.key.as_str(), m)).collect();
    let mut report = DriftReport::default();

    for (key, entry) in manifest.iter() {
        if let Some(prefix) = prefix {
            if !key.starts_with(prefix) {
                continue;
            }
        }
        report.checked += 1;

        let Some(meta) = remote.get(key.as_str()) else {
            report.missing_remote.push(key.clone());
            continue;
        };

        if let Some(size) = entry.size {
            if size != meta.size {
                report.size_mismatch.push((key.clone(), size, meta.size));
                continue;
            }
        }

        if let (Some(digest), Some(tag)) = (&entry.digest, meta.e_tag.as_deref().and_then(etag_as_md5)) {
            if !digest.eq_ignore_ascii_case(tag) {
                report.digest_mismatch.push(key.clone());
            }
        }
    }

    report.untracked = listing
        .iter()
        .filter(|m| m.key != manifest_key && !manifest.contains(&m.key))
        .map(|m| m.key.clone())
        .collect();

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ManifestEntry;
    use chrono::Utc;

    fn meta(key: &str, size: u64, e_tag: Option<&str>) -> RemoteMeta {
        RemoteMeta {
            key: key.to_string(),
            size,
            e_tag: e_tag.map(str::to_string),
            last_modified: Utc::now(),
        }
    }

    fn manifest() -> Manifest {
        let mut manifest = Manifest::new();
        for (key, size, digest) in [
            ("assets/a.css", 120, "900150983cd24fb0d6963f7d28e17f72"),
            ("assets/b.js", 340, "d2"),
            ("fonts/f.woff2", 9, "d9"),
            ("images/x.png", 50, "e2fc714c4727ee9395f324cd2e7f331f"),
        ] {
            manifest.insert(
                key.to_string(),
                ManifestEntry {
                    size: Some(size),
                    digest: Some(digest.to_string()),
                    ..Default::default()
                },
            );
        }
        manifest
    }

    #[test]
    fn test_detects_drift() {
        let listing = vec![
            meta(".upload-manifest.json", 400, None),
            meta("assets/a.css", 120, Some("\"900150983CD24FB0D6963F7D28E17F72\"")),
            meta("assets/b.js", 300, None),
            meta("images/x.png", 50, Some("00000000000000000000000000000000")),
            meta("stray.html", 10, None),
        ];

        let report = compare(&manifest(), &listing, ".upload-manifest.json", None);
        assert_eq!(report.checked, 4);
        assert_eq!(report.missing_remote, vec!["fonts/f.woff2".to_string()]);
        assert_eq!(report.size_mismatch, vec![("assets/b.js".to_string(), 340, 300)]);
        assert_eq!(report.digest_mismatch, vec!["images/x.png".to_string()]);
        assert_eq!(report.untracked, vec!["stray.html".to_string()]);
        assert!(!report.is_clean());
    }

    #[test]
    fn test_multipart_etag_is_ignored() {
        let listing = vec![meta("images/x.png", 50, Some("\"abc-2\""))];
        let report = compare(&manifest(), &listing, ".upload-manifest.json", Some("images/"));
        assert_eq!(report.checked, 1);
        assert!(report.is_clean());
    }
}

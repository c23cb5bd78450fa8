//! Upload manifest types.
//!
//! The manifest records every key the uploader has stored with its size and
//! digest, allowing the next run to diff against it and only upload changed
//! files. It is serialized as a single JSON object (`.upload-manifest.json`)
//! whose values are either a legacy bare digest string or a structured entry.

pub mod store;
pub mod writer;

use crate::fs::FileRecord;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

pub use store::{LoadStatus, LoadedManifest, ManifestStore, ManifestVersion};
pub use writer::{ManifestWriter, SaveOutcome};

/// Metadata for a single key in the manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,

    #[serde(default, alias = "hash", skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,

    #[serde(default, deserialize_with = "lenient_time", skip_serializing_if = "Option::is_none")]
    pub mtime: Option<DateTime<Utc>>,

    #[serde(
        default,
        alias = "uploadTime",
        deserialize_with = "lenient_time",
        skip_serializing_if = "Option::is_none"
    )]
    pub uploaded_at: Option<DateTime<Utc>>,

    /// Source key when this object is a server-side alias copy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapped_from: Option<String>,

    /// Read from a bare digest string
    #[serde(skip)]
    pub legacy: bool,
}

impl ManifestEntry {
    /// Entry from the legacy `{key: "digest"}` shape.
    pub fn legacy(digest: String) -> Self {
        Self {
            digest: Some(digest),
            legacy: true,
            ..Default::default()
        }
    }
}

/// Timestamps were written as RFC 3339 strings by some tools and as epoch
/// numbers by others; anything else is treated as absent.
fn lenient_time<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        Value::String(s) => DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(|n| {
            // values past ~1973 in milliseconds exceed any plausible seconds value
            if n.abs() >= 100_000_000_000 {
                Utc.timestamp_millis_opt(n).single()
            } else {
                Utc.timestamp_opt(n, 0).single()
            }
        }),
        _ => None,
    }))
}

fn parse_entry(value: Value) -> Option<ManifestEntry> {
    match value {
        Value::String(digest) => Some(ManifestEntry::legacy(digest)),
        Value::Object(_) => serde_json::from_value(value).ok(),
        _ => None,
    }
}

/// Key → entry mapping plus the set of keys changed since it was loaded.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    entries: BTreeMap<String, ManifestEntry>,
    touched: BTreeSet<String>,
}

/// Aggregate view used by the `manifest` command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestStats {
    pub entries: usize,
    pub legacy: usize,
    pub structured: usize,
    pub aliases: usize,
    pub recorded_bytes: u64,
    pub last_upload: Option<DateTime<Utc>>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a manifest document.
    ///
    /// Fails only if the document is not a JSON object. Entries of an
    /// unrecognised shape are dropped with a warning; the second value is the
    /// number dropped.
    pub fn from_json(data: &[u8]) -> Result<(Self, usize), serde_json::Error> {
        let raw: BTreeMap<String, Value> = serde_json::from_slice(data)?;
        let mut manifest = Self::new();
        let mut dropped = 0;

        for (key, value) in raw {
            match parse_entry(value) {
                Some(entry) => {
                    manifest.entries.insert(key, entry);
                }
                None => {
                    warn!("Ignoring unrecognised manifest entry for {}", key);
                    dropped += 1;
                }
            }
        }

        Ok((manifest, dropped))
    }

    /// Pretty-printed JSON document. Legacy entries keep their bare-digest shape.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut doc = serde_json::Map::with_capacity(self.entries.len());
        for (key, entry) in &self.entries {
            let value = match (&entry.digest, entry.legacy) {
                (Some(digest), true) => Value::String(digest.clone()),
                _ => serde_json::to_value(entry)?,
            };
            doc.insert(key.clone(), value);
        }
        serde_json::to_vec_pretty(&Value::Object(doc))
    }

    pub fn get(&self, key: &str) -> Option<&ManifestEntry> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ManifestEntry)> {
        self.entries.iter()
    }

    /// Insert or replace an entry, marking it as written by this run.
    pub fn insert(&mut self, key: String, entry: ManifestEntry) {
        self.touched.insert(key.clone());
        self.entries.insert(key, entry);
    }

    /// Record a successful upload of `record`.
    pub fn record_upload(
        &mut self,
        record: &FileRecord,
        size: u64,
        digest: String,
        uploaded_at: DateTime<Utc>,
    ) {
        self.insert(
            record.key.clone(),
            ManifestEntry {
                size: Some(size),
                digest: Some(digest),
                mtime: record.modified_at,
                uploaded_at: Some(uploaded_at),
                mapped_from: None,
                legacy: false,
            },
        );
    }

    /// Whether this run has changed anything since the manifest was loaded.
    pub fn has_changes(&self) -> bool {
        !self.touched.is_empty()
    }

    /// Replace the base with a freshly loaded copy while keeping every entry
    /// this run wrote. Used after a concurrent writer changed the document.
    pub fn rebase_onto(&mut self, mut remote: Manifest) {
        for key in &self.touched {
            if let Some(entry) = self.entries.get(key) {
                remote.entries.insert(key.clone(), entry.clone());
            }
        }
        self.entries = remote.entries;
    }

    pub fn stats(&self) -> ManifestStats {
        let mut stats = ManifestStats {
            entries: self.entries.len(),
            ..Default::default()
        };

        for entry in self.entries.values() {
            if entry.legacy {
                stats.legacy += 1;
            } else {
                stats.structured += 1;
            }
            if entry.mapped_from.is_some() {
                stats.aliases += 1;
            }
            stats.recorded_bytes += entry.size.unwrap_or(0);
            if entry.uploaded_at > stats.last_upload {
                stats.last_upload = entry.uploaded_at;
            }
        }

        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_accepts_legacy_and_structured_entries() {
        let doc = br#"{
            "assets/old.css": "9e107d9d372bb6826bd81d3542a419d6",
            "assets/a.css": {"size": 120, "digest": "d1", "uploadedAt": "2024-05-01T10:00:00Z"},
            "assets/b.js": {"hash": "d2", "size": 340, "mtime": "2024-04-30T09:00:00.000Z", "uploadTime": "2024-05-01T10:00:00.000Z"}
        }"#;

        let (manifest, dropped) = Manifest::from_json(doc).unwrap();
        assert_eq!(dropped, 0);
        assert_eq!(manifest.len(), 3);

        let old = manifest.get("assets/old.css").unwrap();
        assert!(old.legacy);
        assert_eq!(old.size, None);
        assert_eq!(old.digest.as_deref(), Some("9e107d9d372bb6826bd81d3542a419d6"));

        let a = manifest.get("assets/a.css").unwrap();
        assert_eq!(a.size, Some(120));
        assert_eq!(a.digest.as_deref(), Some("d1"));
        assert!(a.uploaded_at.is_some());

        let b = manifest.get("assets/b.js").unwrap();
        assert_eq!(b.digest.as_deref(), Some("d2"));
        assert!(b.mtime.is_some());
        assert!(b.uploaded_at.is_some());
    }

    #[test]
    fn test_numeric_and_garbage_timestamps() {
        let doc = br#"{
            "a": {"size": 1, "mtime": 1714557600},
            "b": {"size": 2, "mtime": 1714557600000},
            "c": {"size": 3, "mtime": "yesterday"}
        }"#;
        let (manifest, _) = Manifest::from_json(doc).unwrap();
        let a = manifest.get("a").unwrap().mtime.unwrap();
        let b = manifest.get("b").unwrap().mtime.unwrap();
        assert_eq!(a, b);
        assert_eq!(manifest.get("c").unwrap().mtime, None);
    }

    #[test]
    fn test_unrecognised_entries_are_dropped() {
        let doc = br#"{"a": 42, "b": null, "c": {"size": "big"}, "d": {"size": 7}}"#;
        let (manifest, dropped) = Manifest::from_json(doc).unwrap();
        assert_eq!(dropped, 3);
        assert_eq!(manifest.len(), 1);
        assert!(manifest.contains("d"));
    }

    #[test]
    fn test_non_object_document_is_an_error() {
        assert!(Manifest::from_json(b"[1, 2, 3]").is_err());
        assert!(Manifest::from_json(b"not json").is_err());
    }

    #[test]
    fn test_serialized_shape() {
        let mut manifest = Manifest::new();
        let record = FileRecord {
            key: "assets/b.js".to_string(),
            path: PathBuf::from("/dist/assets/b.js"),
            size: 340,
            modified_at: None,
            digest: None,
        };
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        manifest.record_upload(&record, 340, "d2".to_string(), at);

        let value: Value = serde_json::from_slice(&manifest.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "assets/b.js": {"size": 340, "digest": "d2", "uploadedAt": "2024-05-01T10:00:00Z"}
            })
        );
        assert!(manifest.has_changes());
    }

    #[test]
    fn test_legacy_entries_keep_their_shape() {
        let (mut manifest, _) = Manifest::from_json(br#"{"assets/old.css": "abc"}"#).unwrap();
        manifest.insert(
            "assets/new.css".to_string(),
            ManifestEntry {
                size: Some(3),
                digest: Some("def".to_string()),
                ..Default::default()
            },
        );

        let value: Value = serde_json::from_slice(&manifest.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "assets/new.css": {"size": 3, "digest": "def"},
                "assets/old.css": "abc"
            })
        );
    }

    #[test]
    fn test_rebase_keeps_touched_entries() {
        let (mut ours, _) = Manifest::from_json(br#"{"a.css": {"size": 1, "digest": "x"}}"#).unwrap();
        ours.insert(
            "b.js".to_string(),
            ManifestEntry {
                size: Some(2),
                digest: Some("y".to_string()),
                ..Default::default()
            },
        );

        let (theirs, _) = Manifest::from_json(
            br#"{"a.css": {"size": 9, "digest": "z"}, "c.png": {"size": 3, "digest": "w"}}"#,
        )
        .unwrap();

        ours.rebase_onto(theirs);
        assert_eq!(ours.len(), 3);
        assert_eq!(ours.get("a.css").unwrap().size, Some(9));
        assert_eq!(ours.get("b.js").unwrap().digest.as_deref(), Some("y"));
        assert!(ours.contains("c.png"));
    }

    #[test]
    fn test_stats() {
        let doc = br#"{
            "old.css": "abc",
            "a.css": {"size": 100, "digest": "d1", "uploadedAt": "2024-05-01T10:00:00Z"},
            "assets/x.png": {"size": 50, "digest": "d3", "uploadedAt": "2024-06-01T10:00:00Z", "mappedFrom": "_astro/x.png"}
        }"#;
        let (manifest, _) = Manifest::from_json(doc).unwrap();
        let stats = manifest.stats();
        assert_eq!(stats.entries, 3);
        assert_eq!(stats.legacy, 1);
        assert_eq!(stats.structured, 2);
        assert_eq!(stats.aliases, 1);
        assert_eq!(stats.recorded_bytes, 150);
        assert_eq!(
            stats.last_upload,
            Some(Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap())
        );
    }
}

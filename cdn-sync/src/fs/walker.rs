//! Local file scanning.
//!
//! Walks the build output roots and produces one [`FileRecord`] per uploadable
//! file, keyed by its forward-slash storage path.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Options for scanning
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Directory that keys are relative to
    pub base_dir: PathBuf,

    /// Roots to walk, relative to `base_dir` unless absolute
    pub roots: Vec<PathBuf>,

    /// Key prefixes to strip (first match wins)
    pub strip_prefixes: Vec<String>,

    /// Extensions that are never uploaded
    pub exclude: ExtensionFilter,

    /// Follow symbolic links
    pub follow_links: bool,
}

impl ScanOptions {
    pub fn from_config(config: &crate::config::ScanConfig) -> Self {
        Self {
            base_dir: config.base_dir.clone(),
            roots: config.roots.clone(),
            strip_prefixes: config.strip_prefixes.clone(),
            exclude: ExtensionFilter::new(&config.exclude_extensions),
            follow_links: config.follow_links,
        }
    }
}

/// Case-insensitive set of excluded file extensions.
#[derive(Debug, Clone, Default)]
pub struct ExtensionFilter {
    extensions: HashSet<String>,
}

impl ExtensionFilter {
    pub fn new<S: AsRef<str>>(extensions: &[S]) -> Self {
        Self {
            extensions: extensions
                .iter()
                .map(|e| e.as_ref().trim_start_matches('.').to_ascii_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
        }
    }

    pub fn is_excluded(&self, key: &str) -> bool {
        match extension_of(key) {
            Some(ext) => self.extensions.contains(&ext),
            None => false,
        }
    }
}

fn extension_of(key: &str) -> Option<String> {
    let name = key.rsplit('/').next()?;
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() {
        // dotfile such as `.htaccess`
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// One on-disk asset eligible for sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Storage key (forward-slash separated)
    pub key: String,

    /// Full path to the file
    pub path: PathBuf,

    /// File size in bytes
    pub size: u64,

    /// Local modification time; unreliable after a CI checkout
    pub modified_at: Option<DateTime<Utc>>,

    /// Lowercase hex MD5 of the contents, once computed
    pub digest: Option<String>,
}

impl FileRecord {
    /// Same record with its digest attached.
    pub fn with_digest(self, digest: String) -> Self {
        Self {
            digest: Some(digest),
            ..self
        }
    }
}

/// Outcome of a scan
#[derive(Debug, Default)]
pub struct ScanReport {
    /// Unique records, smallest first
    pub records: Vec<FileRecord>,

    /// Files skipped because of their extension
    pub excluded: usize,

    /// Files dropped because another root already produced their key
    pub duplicates: usize,

    /// Entries that could not be read
    pub errors: usize,

    /// Roots that do not exist
    pub missing_roots: Vec<PathBuf>,
}

impl ScanReport {
    pub fn total_bytes(&self) -> u64 {
        self.records.iter().map(|r| r.size).sum()
    }
}

/// Convert a path relative to the base directory into a storage key.
///
/// Returns `None` for paths that cannot be keyed (parent references, non UTF-8).
pub fn normalize_key(relative: &Path, strip_prefixes: &[String]) -> Option<String> {
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?.to_string()),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if parts.is_empty() {
        return None;
    }

    let key = parts.join("/");
    for prefix in strip_prefixes {
        if let Some(stripped) = key.strip_prefix(prefix.as_str()) {
            if !stripped.is_empty() {
                return Some(stripped.to_string());
            }
        }
    }
    Some(key)
}

/// Walk every root and collect the uploadable files.
///
/// Never fails: missing roots and unreadable entries are logged and counted.
pub fn scan(options: &ScanOptions) -> ScanReport {
    let mut report = ScanReport::default();
    let mut seen = HashSet::new();

    for root in &options.roots {
        let root_path = if root.is_absolute() {
            root.clone()
        } else {
            options.base_dir.join(root)
        };

        if !root_path.is_dir() {
            debug!("Scan root not present: {}", root_path.display());
            report.missing_roots.push(root_path);
            continue;
        }

        let before = report.records.len();
        scan_root(&root_path, options, &mut seen, &mut report);
        info!(
            "Scanned {}: {} files",
            root_path.display(),
            report.records.len() - before
        );
    }

    if report.records.is_empty() && !report.missing_roots.is_empty() {
        warn!(
            "No files found; {} scan roots are missing under {}",
            report.missing_roots.len(),
            options.base_dir.display()
        );
    }

    report
        .records
        .sort_by(|a, b| a.size.cmp(&b.size).then_with(|| a.key.cmp(&b.key)));
    report
}

fn scan_root(
    root: &Path,
    options: &ScanOptions,
    seen: &mut HashSet<String>,
    report: &mut ScanReport,
) {
    let walker = WalkDir::new(root)
        .follow_links(options.follow_links)
        .sort_by_file_name();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry: {}", e);
                report.errors += 1;
                continue;
            }
        };

        if entry.file_type().is_dir() {
            continue;
        }

        let metadata = match std::fs::metadata(entry.path()) {
            Ok(m) if m.is_file() => m,
            Ok(_) => continue,
            Err(e) => {
                warn!("Skipping {}: {}", entry.path().display(), e);
                report.errors += 1;
                continue;
            }
        };

        let relative = entry
            .path()
            .strip_prefix(&options.base_dir)
            .or_else(|_| entry.path().strip_prefix(root.parent().unwrap_or(root)))
            .unwrap_or_else(|_| entry.path());

        let key = match normalize_key(relative, &options.strip_prefixes) {
            Some(key) => key,
            None => {
                warn!("Skipping {}: path cannot be used as a key", entry.path().display());
                report.errors += 1;
                continue;
            }
        };

        if options.exclude.is_excluded(&key) {
            report.excluded += 1;
            continue;
        }

        if !seen.insert(key.clone()) {
            debug!("Duplicate key {} from {}", key, entry.path().display());
            report.duplicates += 1;
            continue;
        }

        report.records.push(FileRecord {
            key,
            path: entry.path().to_path_buf(),
            size: metadata.len(),
            modified_at: metadata.modified().ok().map(DateTime::<Utc>::from),
            digest: None,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn options(base: &Path, roots: &[&str]) -> ScanOptions {
        ScanOptions {
            base_dir: base.to_path_buf(),
            roots: roots.iter().map(PathBuf::from).collect(),
            strip_prefixes: vec!["client/".to_string()],
            exclude: ExtensionFilter::new(&["map", "txt", "md", "json"]),
            follow_links: false,
        }
    }

    fn keys(report: &ScanReport) -> Vec<&str> {
        report.records.iter().map(|r| r.key.as_str()).collect()
    }

    #[test]
    fn test_scan_empty_directory() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::create_dir(temp_dir.path().join("assets"))?;

        let report = scan(&options(temp_dir.path(), &["assets"]));
        assert!(report.records.is_empty());
        assert!(report.missing_roots.is_empty());
        Ok(())
    }

    #[test]
    fn test_scan_nested_keys_are_forward_slash() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::create_dir_all(temp_dir.path().join("images/blog/2024"))?;
        fs::write(temp_dir.path().join("images/blog/2024/hero.png"), b"png")?;
        fs::write(temp_dir.path().join("images/logo.svg"), b"<svg/>")?;

        let report = scan(&options(temp_dir.path(), &["images"]));
        let mut found = keys(&report);
        found.sort();
        assert_eq!(found, vec!["images/blog/2024/hero.png", "images/logo.svg"]);
        Ok(())
    }

    #[test]
    fn test_client_prefix_is_stripped_and_deduplicated() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::create_dir_all(temp_dir.path().join("client/assets"))?;
        fs::create_dir_all(temp_dir.path().join("assets"))?;
        fs::write(temp_dir.path().join("client/assets/a.css"), b"body{}")?;
        fs::write(temp_dir.path().join("assets/a.css"), b"body{color:red}")?;

        let report = scan(&options(temp_dir.path(), &["client/assets", "assets"]));
        assert_eq!(keys(&report), vec!["assets/a.css"]);
        assert_eq!(report.duplicates, 1);
        // first root wins
        assert!(report.records[0].path.ends_with("client/assets/a.css"));
        Ok(())
    }

    #[test]
    fn test_excluded_extensions_are_counted() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::create_dir(temp_dir.path().join("assets"))?;
        fs::write(temp_dir.path().join("assets/app.js"), b"js")?;
        fs::write(temp_dir.path().join("assets/app.js.map"), b"{}")?;
        fs::write(temp_dir.path().join("assets/README.MD"), b"# hi")?;

        let report = scan(&options(temp_dir.path(), &["assets"]));
        assert_eq!(keys(&report), vec!["assets/app.js"]);
        assert_eq!(report.excluded, 2);
        Ok(())
    }

    #[test]
    fn test_missing_root_is_skipped() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::create_dir(temp_dir.path().join("fonts"))?;
        fs::write(temp_dir.path().join("fonts/a.woff2"), b"font")?;

        let report = scan(&options(temp_dir.path(), &["client/fonts", "fonts"]));
        assert_eq!(keys(&report), vec!["fonts/a.woff2"]);
        assert_eq!(report.missing_roots.len(), 1);
        Ok(())
    }

    #[test]
    fn test_records_sorted_smallest_first() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::create_dir(temp_dir.path().join("assets"))?;
        fs::write(temp_dir.path().join("assets/big.js"), vec![b'x'; 300])?;
        fs::write(temp_dir.path().join("assets/small.js"), vec![b'x'; 10])?;
        fs::write(temp_dir.path().join("assets/mid.js"), vec![b'x'; 100])?;

        let report = scan(&options(temp_dir.path(), &["assets"]));
        assert_eq!(
            keys(&report),
            vec!["assets/small.js", "assets/mid.js", "assets/big.js"]
        );
        assert_eq!(report.total_bytes(), 410);
        assert!(report.records.iter().all(|r| r.digest.is_none()));
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_link_is_counted_not_fatal() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::create_dir(temp_dir.path().join("assets"))?;
        fs::write(temp_dir.path().join("assets/a.css"), b"body{}")?;
        fs::write(temp_dir.path().join("assets/z.js"), b"js")?;
        std::os::unix::fs::symlink(
            temp_dir.path().join("assets/gone.css"),
            temp_dir.path().join("assets/m.css"),
        )?;

        let mut opts = options(temp_dir.path(), &["assets"]);
        opts.follow_links = true;
        let report = scan(&opts);

        let mut found = keys(&report);
        found.sort();
        assert_eq!(found, vec!["assets/a.css", "assets/z.js"]);
        assert_eq!(report.errors, 1);
        Ok(())
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_non_utf8_name_is_counted_not_fatal() -> std::io::Result<()> {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let temp_dir = TempDir::new()?;
        fs::create_dir(temp_dir.path().join("assets"))?;
        fs::write(temp_dir.path().join("assets/a.css"), b"body{}")?;
        fs::write(
            temp_dir.path().join("assets").join(OsStr::from_bytes(b"bad\xff.js")),
            b"js",
        )?;

        let report = scan(&options(temp_dir.path(), &["assets"]));
        assert_eq!(keys(&report), vec!["assets/a.css"]);
        assert_eq!(report.errors, 1);
        Ok(())
    }

    #[test]
    fn test_normalize_key() {
        let strip = vec!["client/".to_string()];
        assert_eq!(
            normalize_key(Path::new("client/_astro/x.js"), &strip).as_deref(),
            Some("_astro/x.js")
        );
        assert_eq!(
            normalize_key(Path::new("./assets/a.css"), &strip).as_deref(),
            Some("assets/a.css")
        );
        assert_eq!(normalize_key(Path::new("../etc/passwd"), &strip), None);
    }

    #[test]
    fn test_extension_filter() {
        let filter = ExtensionFilter::new(&[".map", "TXT"]);
        assert!(filter.is_excluded("assets/app.js.map"));
        assert!(filter.is_excluded("robots.txt"));
        assert!(!filter.is_excluded("assets/app.js"));
        assert!(!filter.is_excluded(".txt"));
        assert!(!filter.is_excluded("LICENSE"));
    }
}

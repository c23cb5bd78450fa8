//! `manifest`: show what the remote manifest records.

use super::{load_manifest, open_store};
use crate::config::Config;
use crate::manifest::{LoadStatus, Manifest};
use crate::transfer::progress::format_bytes;
use crate::utils::Result;
use std::fmt::Write;

pub async fn run(config: &Config, limit: usize) -> Result<()> {
    let store = open_store(config)?;
    let loaded = load_manifest(config, store).await;

    if let LoadStatus::Unavailable(e) = &loaded.status {
        println!("Manifest {} could not be read: {}", config.storage.manifest_key, e);
        return Ok(());
    }

    print!("{}", render(&config.storage.manifest_key, &loaded.manifest, limit));
    Ok(())
}

pub fn render(key: &str, manifest: &Manifest, limit: usize) -> String {
    let stats = manifest.stats();
    let mut out = String::new();

    let _ = writeln!(out, "Manifest {}", key);
    let _ = writeln!(
        out,
        "  {} entries ({} structured, {} legacy, {} aliases), {} recorded",
        stats.entries,
        stats.structured,
        stats.legacy,
        stats.aliases,
        format_bytes(stats.recorded_bytes)
    );
    if let Some(at) = stats.last_upload {
        let _ = writeln!(out, "  last upload {}", at.to_rfc3339());
    }

    for (key, entry) in manifest.iter().take(limit) {
        let size = entry
            .size
            .map(|s| s.to_string())
            .unwrap_or_else(|| "?".to_string());
        let digest = entry.digest.as_deref().unwrap_or("-");
        let _ = write!(out, "  {:<60} {:>10} {}", key, size, digest);
        if let Some(from) = &entry.mapped_from {
            let _ = write!(out, " (from {})", from);
        }
        out.push('\n');
    }

    if manifest.len() > limit {
        let _ = writeln!(out, "  ... {} more", manifest.len() - limit);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render() {
        let (manifest, _) = Manifest::from_json(
            br#"{
                "assets/a.css": {"size": 120, "digest": "d1", "uploadedAt": "2024-05-01T10:00:00Z"},
                "assets/old.js": "d0",
                "assets/x.png": {"size": 50, "digest": "d3", "mappedFrom": "_astro/x.png"}
            }"#,
        )
        .unwrap();

        let text = render(".upload-manifest.json", &manifest, 2);
        assert!(text.contains("3 entries (2 structured, 1 legacy, 1 aliases)"));
        assert!(text.contains("last upload 2024-05-01T10:00:00+00:00"));
        assert!(text.contains("assets/a.css"));
        assert!(!text.contains("assets/x.png"));
        assert!(text.contains("... 1 more"));
    }
}

//! `probe`: HEAD requests through the CDN to check what it serves.

use super::{load_manifest, open_store};
use crate::config::Config;
use crate::manifest::Manifest;
use crate::utils::{Result, SyncError};
use futures_util::stream::{self, StreamExt};
use reqwest::header::{CACHE_CONTROL, CONTENT_LENGTH};
use std::time::Duration;
use tracing::debug;

const PROBE_CONCURRENCY: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub key: String,
    pub url: String,
    pub status: Option<u16>,
    pub content_length: Option<u64>,
    pub cache_control: Option<String>,
    pub expected_size: Option<u64>,
    pub error: Option<String>,
}

impl ProbeResult {
    pub fn is_ok(&self) -> bool {
        let status_ok = matches!(self.status, Some(s) if (200..300).contains(&s));
        let size_ok = match (self.expected_size, self.content_length) {
            (Some(expected), Some(actual)) => expected == actual,
            _ => true,
        };
        status_ok && size_ok
    }

    pub fn line(&self) -> String {
        if let Some(e) = &self.error {
            return format!("ERR  {} ({})", self.url, e);
        }
        let status = self.status.map(|s| s.to_string()).unwrap_or_else(|| "---".to_string());
        let size = match (self.content_length, self.expected_size) {
            (Some(actual), Some(expected)) if actual != expected => {
                format!("{} bytes, manifest says {}", actual, expected)
            }
            (Some(actual), _) => format!("{} bytes", actual),
            (None, _) => "size unknown".to_string(),
        };
        let verdict = if self.is_ok() { "OK  " } else { "FAIL" };
        format!(
            "{} {} {} [{}] cache-control: {}",
            verdict,
            status,
            self.url,
            size,
            self.cache_control.as_deref().unwrap_or("-")
        )
    }
}

/// Keys to probe: the ones given, or the first `limit` manifest keys.
pub fn select_keys(keys: &[String], manifest: &Manifest, limit: usize) -> Vec<String> {
    if !keys.is_empty() {
        return keys.to_vec();
    }
    manifest.iter().take(limit).map(|(key, _)| key.clone()).collect()
}

async fn probe_one(client: &reqwest::Client, key: String, url: String, expected_size: Option<u64>) -> ProbeResult {
    debug!("HEAD {}", url);
    let mut result = ProbeResult {
        key,
        url,
        status: None,
        content_length: None,
        cache_control: None,
        expected_size,
        error: None,
    };

    match client.head(&result.url).send().await {
        Ok(resp) => {
            let headers = resp.headers();
            result.status = Some(resp.status().as_u16());
            result.content_length = headers
                .get(CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            result.cache_control = headers
                .get(CACHE_CONTROL)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
        }
        Err(e) => result.error = Some(e.to_string()),
    }
    result
}

pub async fn run(config: &Config, keys: &[String], limit: usize) -> Result<()> {
    if config.cdn.domain.is_none() {
        return Err(SyncError::Config("probe needs a CDN domain (CDN_DOMAIN or [cdn] domain)".to_string()));
    }

    let manifest = if keys.is_empty() || config.validate_storage().is_ok() {
        let store = open_store(config)?;
        load_manifest(config, store).await.manifest
    } else {
        Manifest::new()
    };

    let targets: Vec<(String, String, Option<u64>)> = select_keys(keys, &manifest, limit)
        .into_iter()
        .filter_map(|key| {
            let url = config.cdn.url_for(&key)?;
            let expected = manifest.get(&key).and_then(|e| e.size);
            Some((key, url, expected))
        })
        .collect();

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.upload.timeout_secs.clamp(1, 30)))
        .build()?;

    let results: Vec<ProbeResult> = stream::iter(targets)
        .map(|(key, url, expected)| probe_one(&client, key, url, expected))
        .buffered(PROBE_CONCURRENCY)
        .collect()
        .await;

    let failed = results.iter().filter(|r| !r.is_ok()).count();
    for result in &results {
        println!("{}", result.line());
    }
    println!("{} probed, {} problems", results.len(), failed);
    Ok(())
}

//! Configuration management for cdn-sync.
//!
//! Loads configuration from an optional TOML file, then applies environment
//! variable overrides (after reading `.env`), then command-line overrides in
//! `main`.

use crate::sync::diff::Strategy;
use crate::utils::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub scan: ScanConfig,
    pub upload: UploadConfig,
    pub aliases: AliasConfig,
    pub cdn: CdnConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Bucket name, `<name>-<appid>` on COS
    pub bucket: Option<String>,

    /// Region identifier
    pub region: String,

    /// Explicit S3-compatible endpoint (defaults to the COS virtual-hosted endpoint)
    pub endpoint: Option<String>,

    /// Secret id; normally supplied through the environment
    #[serde(skip_serializing)]
    pub secret_id: Option<String>,

    /// Secret key; normally supplied through the environment
    #[serde(skip_serializing)]
    pub secret_key: Option<String>,

    /// Key of the manifest document in the bucket
    pub manifest_key: String,

    /// Make manifest saves conditional on the version that was loaded
    pub conditional_save: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Build output directory that keys are relative to
    pub base_dir: PathBuf,

    /// Directories to scan, relative to `base_dir` unless absolute
    pub roots: Vec<PathBuf>,

    /// Key prefixes removed so both build layouts map to the same key
    pub strip_prefixes: Vec<String>,

    /// File extensions that are never uploaded (without the dot)
    pub exclude_extensions: Vec<String>,

    /// Follow symbolic links while walking
    pub follow_links: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Comparison strategy used by the diff engine
    pub strategy: Strategy,

    /// Files uploaded concurrently per batch
    pub batch_size: usize,

    /// Retries after the first failed attempt
    pub max_retries: u32,

    /// Base delay for linear backoff (milliseconds)
    pub retry_delay_ms: u64,

    /// Per network call timeout (seconds)
    pub timeout_secs: u64,

    /// Cache-Control header set on uploaded assets
    pub cache_control: String,

    /// Persist the manifest after every batch rather than only at the end
    pub save_each_batch: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AliasConfig {
    /// Copy fingerprinted images to a second, legacy key
    pub enabled: bool,

    pub source_prefix: String,

    pub target_prefix: String,

    /// Extensions eligible for aliasing (without the dot)
    pub extensions: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CdnConfig {
    /// Public CDN domain, used for purge hints and probes
    pub domain: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

// Default values
fn default_region() -> String {
    "ap-guangzhou".to_string()
}

fn default_manifest_key() -> String {
    ".upload-manifest.json".to_string()
}

fn default_roots() -> Vec<PathBuf> {
    ["client/assets", "client/fonts", "client/images", "client/_astro", "assets", "fonts", "images", "_astro"]
        .iter()
        .map(PathBuf::from)
        .collect()
}

fn default_exclude_extensions() -> Vec<String> {
    ["map", "txt", "md", "json"].iter().map(|s| s.to_string()).collect()
}

fn default_alias_extensions() -> Vec<String> {
    ["jpg", "jpeg", "png", "gif", "webp", "svg"].iter().map(|s| s.to_string()).collect()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket: None,
            region: default_region(),
            endpoint: None,
            secret_id: None,
            secret_key: None,
            manifest_key: default_manifest_key(),
            conditional_save: true,
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("dist"),
            roots: default_roots(),
            strip_prefixes: vec!["client/".to_string()],
            exclude_extensions: default_exclude_extensions(),
            follow_links: false,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::Digest,
            batch_size: 20,
            max_retries: 2,
            retry_delay_ms: 300,
            timeout_secs: 60,
            cache_control: "max-age=31536000".to_string(),
            save_each_batch: true,
        }
    }
}

impl Default for AliasConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            source_prefix: "_astro/".to_string(),
            target_prefix: "assets/".to_string(),
            extensions: default_alias_extensions(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl UploadConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl StorageConfig {
    /// Endpoint to talk to: the explicit one, or `https://<bucket>.cos.<region>.myqcloud.com`.
    pub fn resolved_endpoint(&self) -> Option<String> {
        if let Some(endpoint) = &self.endpoint {
            return Some(endpoint.trim_end_matches('/').to_string());
        }
        self.bucket
            .as_ref()
            .map(|bucket| format!("https://{}.cos.{}.myqcloud.com", bucket, self.region))
    }

    /// Storage URL of an object.
    pub fn object_url(&self, key: &str) -> Option<String> {
        self.resolved_endpoint().map(|e| format!("{}/{}", e, key))
    }
}

impl CdnConfig {
    /// Public URL of `key` on the CDN. The domain may be given with or without a scheme.
    pub fn url_for(&self, key: &str) -> Option<String> {
        let domain = self.domain.as_deref()?.trim().trim_end_matches('/');
        if domain.is_empty() {
            return None;
        }
        let key = key.trim_start_matches('/');
        if domain.starts_with("http://") || domain.starts_with("https://") {
            Some(format!("{}/{}", domain, key))
        } else {
            Some(format!("https://{}/{}", domain, key))
        }
    }
}

/// Read an environment variable, falling back to an alias; empty values count as unset.
fn env_any(names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load the file if given (defaults otherwise), then apply the environment.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        // CI injects secrets directly; a stray .env must not shadow them there.
        if std::env::var_os("GITHUB_ACTIONS").is_none() {
            let _ = dotenvy::dotenv();
        }

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Apply environment variable overrides. Primary names win over legacy aliases.
    pub fn apply_env(&mut self) {
        if let Some(id) = env_any(&["COS_SECRET_ID", "TENCENT_SECRET_ID"]) {
            self.storage.secret_id = Some(id);
        }
        if let Some(key) = env_any(&["COS_SECRET_KEY", "TENCENT_SECRET_KEY"]) {
            self.storage.secret_key = Some(key);
        }
        if let Some(bucket) = env_any(&["TENCENT_COS_BUCKET", "COS_BUCKET"]) {
            self.storage.bucket = Some(bucket);
        }
        if let Some(region) = env_any(&["TENCENT_COS_REGION", "COS_REGION"]) {
            self.storage.region = region;
        }
        if let Some(endpoint) = env_any(&["COS_ENDPOINT"]) {
            self.storage.endpoint = Some(endpoint);
        }
        if let Some(domain) = env_any(&["CDN_DOMAIN"]) {
            self.cdn.domain = Some(domain);
        }
    }

    /// Check the settings needed to talk to the bucket.
    pub fn validate_storage(&self) -> Result<()> {
        let bucket = self.storage.bucket.as_deref().ok_or_else(|| {
            SyncError::Config("bucket not set (TENCENT_COS_BUCKET or COS_BUCKET)".to_string())
        })?;
        if bucket.trim().is_empty() {
            return Err(SyncError::Config("bucket name is empty".to_string()));
        }
        if self.storage.secret_id.is_none() || self.storage.secret_key.is_none() {
            return Err(SyncError::Config(
                "missing credentials: COS_SECRET_ID/TENCENT_SECRET_ID and COS_SECRET_KEY/TENCENT_SECRET_KEY".to_string(),
            ));
        }
        Ok(())
    }

    /// Check the upload tuning values.
    pub fn validate_upload(&self) -> Result<()> {
        if self.upload.batch_size == 0 {
            return Err(SyncError::Config("upload.batch_size must be at least 1".to_string()));
        }
        if self.upload.timeout_secs == 0 {
            return Err(SyncError::Config("upload.timeout_secs must be at least 1".to_string()));
        }
        Ok(())
    }
}

//! Upload settings: validation and JSON persistence

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use log::debug;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{CaptureOptions, JpegQuality, Result};

/// Settings for publishing captures to an S3-compatible bucket
///
/// Missing fields in a stored document fall back to [`UploadConfig::default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UploadConfig {
    /// S3 API endpoint, e.g. `https://<account>.r2.cloudflarestorage.com`
    pub endpoint: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket_name: String,
    /// Public base URL objects are served from
    pub cdn_url: String,
    /// Kept as a plain integer so out-of-range stored values surface as a
    /// validation error instead of a parse failure
    pub jpg_quality: i64,
    pub full_page: bool,
    /// Viewport cap for full-page captures (None => whole page)
    pub max_screens: Option<usize>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            access_key_id: String::new(),
            secret_access_key: String::new(),
            bucket_name: String::new(),
            cdn_url: String::new(),
            jpg_quality: 90,
            full_page: false,
            max_screens: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConfigField {
    Endpoint,
    AccessKeyId,
    SecretAccessKey,
    BucketName,
    CdnUrl,
    JpgQuality,
    MaxScreens,
}

impl fmt::Display for ConfigField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConfigField::Endpoint => "endpoint",
            ConfigField::AccessKeyId => "accessKeyId",
            ConfigField::SecretAccessKey => "secretAccessKey",
            ConfigField::BucketName => "bucketName",
            ConfigField::CdnUrl => "cdnUrl",
            ConfigField::JpgQuality => "jpgQuality",
            ConfigField::MaxScreens => "maxScreens",
        };
        f.write_str(name)
    }
}

/// Per-field validation messages; empty when the config is usable
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    pub errors: BTreeMap<ConfigField, String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn error(&self, field: ConfigField) -> Option<&str> {
        self.errors.get(&field).map(String::as_str)
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.errors.iter().map(|(k, v)| format!("{}: {}", k, v)).collect();
        f.write_str(&parts.join("; "))
    }
}

fn check_https_url(value: &str, label: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        return Some(format!("{} is required", label));
    }
    match Url::parse(value) {
        Ok(url) if url.scheme() == "https" => None,
        Ok(_) => Some(format!("{} must start with https://", label)),
        Err(_) => Some(format!("{} must be a valid URL", label)),
    }
}

fn check_required(value: &str, label: &str) -> Option<String> {
    value.trim().is_empty().then(|| format!("{} is required", label))
}

impl UploadConfig {
    pub fn validate(&self) -> ValidationReport {
        let checks = [
            (ConfigField::Endpoint, check_https_url(&self.endpoint, "Endpoint URL")),
            (ConfigField::AccessKeyId, check_required(&self.access_key_id, "Access Key ID")),
            (ConfigField::SecretAccessKey, check_required(&self.secret_access_key, "Secret Access Key")),
            (ConfigField::BucketName, check_required(&self.bucket_name, "Bucket name")),
            (ConfigField::CdnUrl, check_https_url(&self.cdn_url, "CDN URL")),
            (
                ConfigField::JpgQuality,
                (!(1..=100).contains(&self.jpg_quality)).then(|| "JPG quality must be between 1 and 100".to_string()),
            ),
            (
                ConfigField::MaxScreens,
                (self.max_screens == Some(0)).then(|| "Max screens must be at least 1".to_string()),
            ),
        ];

        ValidationReport {
            errors: checks.into_iter().filter_map(|(field, msg)| msg.map(|m| (field, m))).collect(),
        }
    }

    /// Capture quality; only meaningful on a validated config
    pub fn quality(&self) -> Result<JpegQuality> {
        let q = u8::try_from(self.jpg_quality).unwrap_or(0);
        JpegQuality::new(q)
    }

    pub fn capture_options(&self) -> Result<CaptureOptions> {
        Ok(CaptureOptions {
            quality: self.quality()?,
            max_screens: self.max_screens,
            ..Default::default()
        })
    }

    /// Identity of the credentials a storage client is built from
    pub fn client_fingerprint(&self) -> String {
        format!("{}\0{}\0{}", self.endpoint, self.access_key_id, self.secret_access_key)
    }
}

/// JSON file holding one [`UploadConfig`]
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored settings over defaults; a missing file yields the defaults
    pub fn load(&self) -> Result<UploadConfig> {
        if !self.path.exists() {
            debug!("no config at {}, using defaults", self.path.display());
            return Ok(UploadConfig::default());
        }
        let raw = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Persist `config`, dropping trailing slashes from the CDN URL
    pub fn save(&self, config: &UploadConfig) -> Result<()> {
        let normalized = UploadConfig {
            cdn_url: config.cdn_url.trim_end_matches('/').to_string(),
            ..config.clone()
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(&normalized)?)?;
        debug!("saved config to {}", self.path.display());
        Ok(())
    }
}

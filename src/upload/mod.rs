//! Publishing captures: object keys, public URLs and storage clients

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info};
use uuid::Uuid;

use crate::config::UploadConfig;
use crate::{JpegImage, Result};

#[cfg(feature = "s3")]
pub mod s3;

#[cfg(feature = "s3")]
pub use s3::{ClientCache, S3Client};

/// Minimal object storage surface the uploader needs
pub trait ObjectStore: Send + Sync {
    fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Succeeds when the bucket exists and the credentials may access it
    fn head_bucket(&self, bucket: &str) -> impl Future<Output = Result<()>> + Send;
}

/// Builds (or reuses) a store for a given set of upload settings
pub trait StoreProvider: Send + Sync {
    type Store: ObjectStore;

    fn store_for(&self, config: &UploadConfig) -> Result<Arc<Self::Store>>;
}

/// `YYYY-MM-DD/<uuid>.jpg`, dated in UTC
pub fn generate_object_key(date: DateTime<Utc>) -> String {
    format!("{}/{}.jpg", date.format("%Y-%m-%d"), Uuid::new_v4())
}

/// Public URL of `object_key` under the CDN base URL.
///
/// Trailing slashes on the base are ignored; a bare host gets `https://`.
pub fn build_public_url(cdn_url: &str, object_key: &str) -> String {
    let base = cdn_url.trim().trim_end_matches('/');
    if base.contains("://") {
        format!("{}/{}", base, object_key)
    } else {
        format!("https://{}/{}", base, object_key)
    }
}

/// Upload a JPEG under a fresh dated key and return its public URL
pub async fn upload_jpeg<S: ObjectStore>(store: &S, bucket: &str, cdn_url: &str, jpeg: Vec<u8>) -> Result<String> {
    let key = generate_object_key(Utc::now());
    let size = jpeg.len();
    store.put_object(bucket, &key, jpeg, JpegImage::MIME).await?;
    let url = build_public_url(cdn_url, &key);
    info!("uploaded {} bytes to {}/{} -> {}", size, bucket, key, url);
    Ok(url)
}

/// Outcome of a connection check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionResult {
    pub ok: bool,
    pub error: Option<String>,
}

/// Check that `bucket` is reachable with the store's credentials
pub async fn verify_connection<S: ObjectStore>(store: &S, bucket: &str) -> ConnectionResult {
    match store.head_bucket(bucket).await {
        Ok(()) => ConnectionResult { ok: true, error: None },
        Err(e) => {
            debug!("connection check for {} failed: {}", bucket, e);
            ConnectionResult {
                ok: false,
                error: Some(e.to_string()),
            }
        }
    }
}

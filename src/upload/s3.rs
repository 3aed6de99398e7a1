//! S3-compatible client (Cloudflare R2, MinIO, AWS) with SigV4 signing
//!
//! Only the two calls the uploader needs are implemented: `PutObject` and
//! `HeadBucket`, both path-style (`<endpoint>/<bucket>/<key>`).

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use log::debug;
use reqwest::{Client, Method, StatusCode};
use sha2::{Digest, Sha256};
use url::Url;

use super::{ObjectStore, StoreProvider};
use crate::config::UploadConfig;
use crate::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// R2 and most S3-compatible stores accept any region under `auto`
pub const DEFAULT_REGION: &str = "auto";

const SERVICE: &str = "s3";
const SIGNED_HEADERS: &str = "host;x-amz-content-sha256;x-amz-date";

#[derive(Debug, Clone)]
pub struct S3Client {
    http: Client,
    endpoint: Url,
    region: String,
    access_key_id: String,
    secret_access_key: String,
}

/// Headers produced by [`S3Client::sign`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequest {
    pub url: Url,
    pub host: String,
    pub amz_date: String,
    pub content_sha256: String,
    pub authorization: String,
}

impl S3Client {
    pub fn new(endpoint: &str, access_key_id: &str, secret_access_key: &str) -> Result<Self> {
        let endpoint = Url::parse(endpoint.trim())
            .map_err(|e| Error::ConfigError(format!("invalid endpoint {:?}: {}", endpoint, e)))?;
        if endpoint.host_str().is_none() {
            return Err(Error::ConfigError(format!("endpoint {} has no host", endpoint)));
        }
        let http = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| Error::InitializationError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            endpoint,
            region: DEFAULT_REGION.to_string(),
            access_key_id: access_key_id.to_string(),
            secret_access_key: secret_access_key.to_string(),
        })
    }

    pub fn from_config(config: &UploadConfig) -> Result<Self> {
        Self::new(&config.endpoint, &config.access_key_id, &config.secret_access_key)
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// Path-style URL for `bucket` (and optionally `key`)
    fn object_url(&self, bucket: &str, key: Option<&str>) -> Url {
        let mut path = self.endpoint.path().trim_end_matches('/').to_string();
        path.push('/');
        path.push_str(&uri_encode(bucket, true));
        if let Some(key) = key {
            path.push('/');
            path.push_str(&uri_encode(key, false));
        }
        let mut url = self.endpoint.clone();
        url.set_path(&path);
        url.set_query(None);
        url
    }

    /// Sign a request without a query string at time `now`
    pub fn sign(&self, method: &Method, url: Url, payload: &[u8], now: DateTime<Utc>) -> SignedRequest {
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date_stamp = now.format("%Y%m%d").to_string();
        let content_sha256 = hex::encode(Sha256::digest(payload));
        let host = match (url.host_str(), url.port()) {
            (Some(h), Some(p)) => format!("{}:{}", h, p),
            (Some(h), None) => h.to_string(),
            (None, _) => String::new(),
        };

        let canonical_request = format!(
            "{}\n{}\n\nhost:{}\nx-amz-content-sha256:{}\nx-amz-date:{}\n\n{}\n{}",
            method.as_str(),
            url.path(),
            host,
            content_sha256,
            amz_date,
            SIGNED_HEADERS,
            content_sha256
        );
        let scope = format!("{}/{}/{}/aws4_request", date_stamp, self.region, SERVICE);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            scope,
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let k_date = hmac_sha256(format!("AWS4{}", self.secret_access_key).as_bytes(), date_stamp.as_bytes());
        let k_region = hmac_sha256(&k_date, self.region.as_bytes());
        let k_service = hmac_sha256(&k_region, SERVICE.as_bytes());
        let k_signing = hmac_sha256(&k_service, b"aws4_request");
        let signature = hex::encode(hmac_sha256(&k_signing, string_to_sign.as_bytes()));

        SignedRequest {
            url,
            host,
            amz_date,
            content_sha256,
            authorization: format!(
                "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
                self.access_key_id, scope, SIGNED_HEADERS, signature
            ),
        }
    }

    async fn send(&self, method: Method, url: Url, body: Vec<u8>, content_type: Option<&str>) -> Result<reqwest::Response> {
        let signed = self.sign(&method, url, &body, Utc::now());
        debug!("{} {}", method, signed.url);

        let mut request = self
            .http
            .request(method, signed.url.clone())
            .header("x-amz-date", &signed.amz_date)
            .header("x-amz-content-sha256", &signed.content_sha256)
            .header("authorization", &signed.authorization);
        if let Some(ct) = content_type {
            request = request.header("content-type", ct);
        }
        if !body.is_empty() {
            request = request.body(body);
        }

        request
            .send()
            .await
            .map_err(|e| Error::ConnectionError(format!("request to {} failed: {}", signed.url, e)))
    }
}

impl ObjectStore for S3Client {
    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>, content_type: &str) -> Result<()> {
        let url = self.object_url(bucket, Some(key));
        let response = self.send(Method::PUT, url, body, Some(content_type)).await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let detail = response.text().await.unwrap_or_default();
        Err(Error::UploadError(format!("PutObject {}/{} returned {}: {}", bucket, key, status, detail.trim())))
    }

    async fn head_bucket(&self, bucket: &str) -> Result<()> {
        let url = self.object_url(bucket, None);
        let response = self.send(Method::HEAD, url, Vec::new(), None).await?;
        match response.status() {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(Error::ConnectionError(format!("bucket {} does not exist", bucket))),
            s => Err(Error::ConnectionError(format!("HeadBucket {} returned {}", bucket, s))),
        }
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    // HMAC takes keys of any length
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).unwrap_or_else(|_| unreachable!());
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// RFC 3986 percent-encoding as SigV4 expects it; `/` is kept in object keys
fn uri_encode(input: &str, encode_slash: bool) -> String {
    let mut out = String::with_capacity(input.len());
    for b in input.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(b as char),
            b'/' if !encode_slash => out.push('/'),
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

/// Reuses the last [`S3Client`] while endpoint and credentials are unchanged
#[derive(Default)]
pub struct ClientCache {
    cached: Mutex<Option<(String, Arc<S3Client>)>>,
}

impl ClientCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn client_for(&self, config: &UploadConfig) -> Result<Arc<S3Client>> {
        let fingerprint = config.client_fingerprint();
        let mut cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((fp, client)) = cached.as_ref() {
            if *fp == fingerprint {
                return Ok(client.clone());
            }
        }
        let client = Arc::new(S3Client::from_config(config)?);
        *cached = Some((fingerprint, client.clone()));
        Ok(client)
    }

    pub fn reset(&self) {
        *self.cached.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl StoreProvider for ClientCache {
    type Store = S3Client;

    fn store_for(&self, config: &UploadConfig) -> Result<Arc<S3Client>> {
        self.client_for(config)
    }
}

//! Request handling: capture-and-upload and connection checks
//!
//! Every failure is folded into a `{ success: false, error }` response; the
//! error text is the underlying error's message, unchanged.

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::config::{ConfigStore, UploadConfig};
use crate::host::{ScriptHost, VisibleCapture};
use crate::pipeline::{capture_visible_jpeg, TabLocks};
use crate::raster::Raster;
use crate::upload::{upload_jpeg, verify_connection, StoreProvider};
use crate::{Result, TabId};

pub const INVALID_CONFIG: &str = "Invalid configuration. Please check settings.";
pub const INTERNAL_PAGE: &str =
    "Full-page capture is not available on browser internal pages. Please try on a regular web page.";

const INTERNAL_SCHEMES: [&str; 5] = ["chrome://", "chrome-extension://", "edge://", "about:", "devtools://"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Request {
    CaptureAndUpload {
        tab: TabId,
        /// URL currently shown in the tab
        #[serde(default)]
        url: String,
        /// Overrides the stored `fullPage` setting
        #[serde(default, rename = "fullPage")]
        full_page: Option<bool>,
    },
    VerifyConnection {
        /// Unsaved settings to check instead of the stored ones
        #[serde(default)]
        config: Option<UploadConfig>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn uploaded(url: String) -> Self {
        Self { success: true, url: Some(url), error: None }
    }

    pub fn ok() -> Self {
        Self { success: true, url: None, error: None }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self { success: false, url: None, error: Some(error.into()) }
    }
}

/// Pages the browser refuses to script
pub fn is_internal_page(url: &str) -> bool {
    INTERNAL_SCHEMES.iter().any(|scheme| url.starts_with(scheme))
}

/// Ties a host, a raster backend, a storage provider and the stored settings
/// together.
pub struct CaptureService<H, R, P> {
    host: H,
    raster: R,
    stores: P,
    config: ConfigStore,
    locks: TabLocks,
}

impl<H, R, P> CaptureService<H, R, P>
where
    H: ScriptHost + VisibleCapture,
    R: Raster,
    P: StoreProvider,
{
    pub fn new(host: H, raster: R, stores: P, config: ConfigStore) -> Self {
        Self {
            host,
            raster,
            stores,
            config,
            locks: TabLocks::new(),
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub async fn handle(&self, request: Request) -> Response {
        let outcome = match request {
            Request::CaptureAndUpload { tab, url, full_page } => self.capture_and_upload(tab, &url, full_page).await,
            Request::VerifyConnection { config } => self.verify(config).await,
        };
        outcome.unwrap_or_else(|e| {
            warn!("request failed: {}", e);
            Response::failure(e.to_string())
        })
    }

    async fn capture_and_upload(&self, tab: TabId, url: &str, full_page: Option<bool>) -> Result<Response> {
        let config = self.config.load()?;
        let report = config.validate();
        if !report.is_valid() {
            warn!("refusing to capture, settings invalid: {}", report);
            return Ok(Response::failure(INVALID_CONFIG));
        }

        let full_page = full_page.unwrap_or(config.full_page);
        let options = config.capture_options()?;

        let jpeg = if full_page {
            if is_internal_page(url) {
                return Ok(Response::failure(INTERNAL_PAGE));
            }
            self.locks
                .capture_full_page(&self.host, &self.raster, tab, &options)
                .await?
                .jpeg
        } else {
            capture_visible_jpeg(&self.host, tab, options.quality).await?
        };

        let store = self.stores.store_for(&config)?;
        let public_url = upload_jpeg(&*store, &config.bucket_name, &config.cdn_url, jpeg).await?;
        Ok(Response::uploaded(public_url))
    }

    async fn verify(&self, config: Option<UploadConfig>) -> Result<Response> {
        let config = match config {
            Some(c) => c,
            None => self.config.load()?,
        };
        if !config.validate().is_valid() {
            return Ok(Response::failure(INVALID_CONFIG));
        }

        let store = self.stores.store_for(&config)?;
        let result = verify_connection(&*store, &config.bucket_name).await;
        if result.ok {
            info!("bucket {} reachable", config.bucket_name);
            Ok(Response::ok())
        } else {
            Ok(Response::failure(result.error.unwrap_or_else(|| "Connection failed".to_string())))
        }
    }
}

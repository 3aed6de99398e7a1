//! pagestitch
//!
//! Captures a rendered web page as a single JPEG, taller than one viewport if
//! need be, and publishes it to S3-compatible object storage.
//!
//! # Features
//!
//! - **Full-page capture**: scrolls the page viewport by viewport, captures
//!   each one, crops the final partial capture and stitches everything onto
//!   one canvas
//! - **Adapter-based hosts**: the pipeline only talks to the [`host`] traits,
//!   so a headless Chrome tab (feature `cdp`) or an in-memory fake can drive it
//! - **S3 publishing** (feature `s3`): SigV4-signed uploads and public URLs
//!
//! # Example
//!
//! ```no_run
//! # #[cfg(feature = "cdp")]
//! # async fn run() -> pagestitch::Result<()> {
//! use pagestitch::cdp::{BrowserConfig, CdpHost};
//! use pagestitch::raster::ImageRaster;
//! use pagestitch::{CaptureOptions, JpegQuality};
//!
//! let host = CdpHost::launch(BrowserConfig::default()).await?;
//! let tab = host.open_tab("https://example.com").await?;
//! let options = CaptureOptions {
//!     quality: JpegQuality::new(85)?,
//!     ..Default::default()
//! };
//! let image = pagestitch::capture_full_page(&host, &ImageRaster, tab, &options).await?;
//! println!("{}x{}, {} bytes", image.width, image.height, image.jpeg.len());
//! host.close().await?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub mod error;
pub use error::{Error, Result};

// Host capabilities the pipeline consumes (page scripting, visible capture)
pub mod host;

// Page geometry probe, scrolling and scroll restoration
pub mod page;

// Raster decode / crop / composite / export
pub mod raster;

// Capture plan and bitmap stitching
pub mod compositor;

// Orchestrator for the full-page capture
pub mod pipeline;

// In-memory host and raster doubles that record every call
pub mod recording;

// Upload settings, validation and persistence
pub mod config;

// Object keys, public URLs and object storage clients
pub mod upload;

// Request handling: capture-and-upload, connection checks
pub mod service;

// Headless Chrome host backed by a worker thread
#[cfg(feature = "cdp")]
pub mod cdp;

pub use compositor::CapturePlan;
pub use page::{PageMetrics, SCROLL_SETTLE};
pub use pipeline::{capture_full_page, capture_visible_jpeg, CapturePipeline, PipelineState, TabLocks};

/// Identifier of a browser tab as understood by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(pub u32);

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tab#{}", self.0)
    }
}

/// JPEG quality on the 1–100 scale used by capture and export
///
/// # Examples
///
/// ```
/// let q = pagestitch::JpegQuality::new(90).unwrap();
/// assert_eq!(q.fraction(), 0.9);
/// assert!(pagestitch::JpegQuality::new(0).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct JpegQuality(u8);

impl JpegQuality {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 100;

    pub fn new(value: u8) -> Result<Self> {
        if !(Self::MIN..=Self::MAX).contains(&value) {
            return Err(Error::ConfigError(format!(
                "JPG quality must be between {} and {}, got {}",
                Self::MIN,
                Self::MAX,
                value
            )));
        }
        Ok(Self(value))
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// Quality mapped onto the 0.01–1.0 range expected by the export step
    pub fn fraction(self) -> f32 {
        f32::from(self.0) / 100.0
    }
}

impl Default for JpegQuality {
    fn default() -> Self {
        Self(90)
    }
}

impl TryFrom<u8> for JpegQuality {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Self::new(value)
    }
}

impl From<JpegQuality> for u8 {
    fn from(q: JpegQuality) -> u8 {
        q.0
    }
}

/// Options for one full-page capture run
///
/// The defaults match what the browser extension shipped with: quality 90,
/// a 150 ms settle interval after each scroll and no cap on the number of
/// viewports.
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    /// Quality used both for each viewport capture and for the final export
    pub quality: JpegQuality,
    /// Wait after each scroll before capturing
    pub settle: Duration,
    /// Upper bound on the number of viewports captured (None => whole page)
    pub max_screens: Option<usize>,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            quality: JpegQuality::default(),
            settle: SCROLL_SETTLE,
            max_screens: None,
        }
    }
}

/// Viewport dimensions in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

/// The stitched page: an encoded JPEG and its pixel dimensions
#[derive(Debug, Clone)]
pub struct JpegImage {
    pub width: u32,
    pub height: u32,
    pub jpeg: Vec<u8>,
}

impl JpegImage {
    pub const MIME: &'static str = "image/jpeg";
}

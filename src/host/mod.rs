//! Host capabilities consumed by the capture pipeline
//!
//! The pipeline never touches a browser directly. It drives a tab through two
//! narrow capabilities:
//!
//! - [`ScriptHost`]: a typed RPC that runs a [`PageOp`] inside the page and
//!   returns the raw result list
//! - [`VisibleCapture`]: captures whatever the tab currently shows as a
//!   `data:image/jpeg;base64,...` URI
//!
//! Raster work (decode, crop, draw, export) lives in [`crate::raster`].

use std::future::Future;

use base64::Engine as Base64Engine;
use serde_json::Value;

use crate::{Error, JpegQuality, Result, TabId};

pub mod data_uri;

pub use data_uri::EncodedImage;

/// An operation executed inside the page context
#[derive(Debug, Clone, PartialEq)]
pub enum PageOp {
    /// Read document/viewport geometry, scroll offset and device pixel ratio,
    /// then reset the page scroll to the origin
    Measure,
    /// `window.scrollTo(x, y)`
    ScrollTo { x: f64, y: f64 },
}

impl PageOp {
    /// JavaScript expression implementing the operation.
    ///
    /// `Measure` yields a JSON string; [`crate::page::get_page_metrics`]
    /// accepts either that string or an already-parsed object.
    pub fn script(&self) -> String {
        match self {
            PageOp::Measure => MEASURE_SCRIPT.to_string(),
            PageOp::ScrollTo { x, y } => format!("(function(){{ window.scrollTo({}, {}); return true; }})()", x, y),
        }
    }
}

const MEASURE_SCRIPT: &str = r#"(function() {
    const metrics = {
        scrollWidth: document.documentElement.scrollWidth,
        scrollHeight: document.documentElement.scrollHeight,
        viewportWidth: window.innerWidth,
        viewportHeight: window.innerHeight,
        originalScrollX: window.scrollX,
        originalScrollY: window.scrollY,
        devicePixelRatio: window.devicePixelRatio
    };
    window.scrollTo(0, 0);
    return JSON.stringify(metrics);
})()"#;

/// Remote page probe / injector.
///
/// Returns the list of per-frame results. An empty list or a `null` payload
/// means the page could not be scripted; a rejected call is an `Err`.
pub trait ScriptHost: Send + Sync {
    fn execute(&self, tab: TabId, op: &PageOp) -> impl Future<Output = Result<Vec<Value>>> + Send;
}

/// Visible-region capture.
///
/// Implementations report rejections (no permission, tab closed) as
/// [`Error::CaptureFailed`].
pub trait VisibleCapture: Send + Sync {
    fn capture_visible(&self, tab: TabId, quality: JpegQuality) -> impl Future<Output = Result<String>> + Send;
}

/// Wrap encoded JPEG bytes in the data URI shape a [`VisibleCapture`] returns
pub fn jpeg_data_uri(bytes: &[u8]) -> String {
    format!(
        "data:image/jpeg;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

/// Normalise a rejected capture into [`Error::CaptureFailed`], leaving
/// already-classified capture errors untouched.
pub(crate) fn capture_failed(err: Error) -> Error {
    match err {
        Error::CaptureFailed(_) => err,
        other => Error::CaptureFailed(other.to_string()),
    }
}

//! Page geometry probe, viewport scrolling and scroll restoration

use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::host::{PageOp, ScriptHost};
use crate::{Error, Result, TabId};

/// Wait after each scroll before the next capture, so layout, paint and
/// scroll-triggered lazy content can settle.
pub const SCROLL_SETTLE: Duration = Duration::from_millis(150);

/// Page and viewport geometry, measured once per capture run.
///
/// Everything is in CSS pixels except `device_pixel_ratio`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMetrics {
    pub scroll_width: f64,
    pub scroll_height: f64,
    pub viewport_width: f64,
    pub viewport_height: f64,
    pub original_scroll_x: f64,
    pub original_scroll_y: f64,
    pub device_pixel_ratio: f64,
}

/// Measure the page and reset its scroll position to `(0, 0)`.
///
/// Fails with [`Error::MetricsUnavailable`] when the host returns no result or
/// a `null` payload.
pub async fn get_page_metrics<H: ScriptHost>(host: &H, tab: TabId) -> Result<PageMetrics> {
    let results = host.execute(tab, &PageOp::Measure).await?;

    let payload = match results.into_iter().next() {
        Some(Value::Null) | None => {
            return Err(Error::MetricsUnavailable(format!("no result from {}", tab)));
        }
        Some(Value::String(s)) => serde_json::from_str::<Value>(&s)
            .map_err(|e| Error::MetricsUnavailable(format!("malformed payload: {}", e)))?,
        Some(v) => v,
    };

    if payload.is_null() {
        return Err(Error::MetricsUnavailable(format!("null payload from {}", tab)));
    }

    let metrics: PageMetrics = serde_json::from_value(payload)
        .map_err(|e| Error::MetricsUnavailable(format!("malformed payload: {}", e)))?;
    debug!("{}: measured {:?}", tab, metrics);
    Ok(metrics)
}

/// Scroll the page vertically to `y` (CSS pixels)
pub async fn scroll_to<H: ScriptHost>(host: &H, tab: TabId, y: f64) -> Result<()> {
    host.execute(tab, &PageOp::ScrollTo { x: 0.0, y }).await?;
    Ok(())
}

/// Put the page back where the user had it
pub async fn restore_scroll<H: ScriptHost>(host: &H, tab: TabId, x: f64, y: f64) -> Result<()> {
    host.execute(tab, &PageOp::ScrollTo { x, y }).await?;
    Ok(())
}

/// Suspend for the settle interval.
pub async fn settle(interval: Duration) {
    if !interval.is_zero() {
        tokio::time::sleep(interval).await;
    }
}

//! Capture plan and stitching
//!
//! [`CapturePlan`] turns [`PageMetrics`] into the list of viewports to capture
//! and the size of the final canvas. [`ReleaseLedger`] owns every decoded
//! bitmap from acquisition until it has been drawn, and releases whatever is
//! still pending when it is dropped, so an early return anywhere in the
//! capture loop cannot leak a bitmap.
//!
//! All offsets handed to the raster are physical pixels
//! (`round(css * device_pixel_ratio)`).

use std::collections::VecDeque;

use log::debug;

use crate::page::PageMetrics;
use crate::raster::Raster;
use crate::{Error, Result};

/// One viewport of the plan
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureStep {
    pub index: usize,
    /// Scroll offset for this capture, CSS pixels
    pub scroll_y_css: f64,
    /// Where the capture lands on the canvas, physical pixels
    pub y_offset: u32,
    /// Bottom rows to keep when the final viewport is only partly used
    pub crop_height: Option<u32>,
}

impl CaptureStep {
    pub fn is_first(&self) -> bool {
        self.index == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CapturePlan {
    pub total_captures: usize,
    pub canvas_width: u32,
    pub canvas_height: u32,
    /// Page height actually covered, CSS pixels (shorter than the page only
    /// when a screen cap truncates it)
    pub covered_height_css: f64,
    pub viewport_height_css: f64,
    pub device_pixel_ratio: f64,
}

impl CapturePlan {
    /// Build the plan for `metrics`, optionally capping the number of
    /// viewports.
    pub fn new(metrics: &PageMetrics, max_screens: Option<usize>) -> Result<Self> {
        let PageMetrics {
            scroll_height,
            viewport_width,
            viewport_height,
            device_pixel_ratio: dpr,
            ..
        } = *metrics;

        let usable = |v: f64| v.is_finite() && v > 0.0;
        if !usable(viewport_height) || !usable(viewport_width) || !usable(dpr) || !scroll_height.is_finite() || scroll_height < 0.0 {
            return Err(Error::MetricsUnavailable(format!(
                "unusable geometry: viewport {}x{}, scroll height {}, dpr {}",
                viewport_width, viewport_height, scroll_height, dpr
            )));
        }

        let needed = ((scroll_height / viewport_height).ceil() as usize).max(1);
        let total_captures = match max_screens {
            Some(cap) => needed.min(cap.max(1)),
            None => needed,
        };
        let covered_height_css = if total_captures < needed {
            total_captures as f64 * viewport_height
        } else {
            scroll_height
        };

        Ok(Self {
            total_captures,
            canvas_width: to_physical(viewport_width, dpr),
            canvas_height: to_physical(covered_height_css, dpr),
            covered_height_css,
            viewport_height_css: viewport_height,
            device_pixel_ratio: dpr,
        })
    }

    pub fn step(&self, index: usize) -> CaptureStep {
        let scroll_y_css = index as f64 * self.viewport_height_css;
        let remaining_css = self.covered_height_css - scroll_y_css;
        let is_last = index + 1 == self.total_captures;
        let crop_height = (is_last && remaining_css < self.viewport_height_css)
            .then(|| to_physical(remaining_css, self.device_pixel_ratio).max(1));

        CaptureStep {
            index,
            scroll_y_css,
            y_offset: to_physical(scroll_y_css, self.device_pixel_ratio),
            crop_height,
        }
    }

    pub fn steps(&self) -> impl Iterator<Item = CaptureStep> + '_ {
        (0..self.total_captures).map(|i| self.step(i))
    }
}

fn to_physical(css: f64, dpr: f64) -> u32 {
    (css * dpr).round().clamp(0.0, f64::from(u32::MAX)) as u32
}

/// A decoded viewport waiting to be drawn
#[derive(Debug)]
pub struct CapturedViewport<B> {
    pub bitmap: B,
    pub y_offset: u32,
}

/// Owns every acquired bitmap until it is drawn.
///
/// Entries come out in capture order. Anything still pending when the ledger
/// is dropped is released then, on success and error paths alike.
pub struct ReleaseLedger<'r, R: Raster> {
    raster: &'r R,
    pending: VecDeque<CapturedViewport<R::Bitmap>>,
}

impl<'r, R: Raster> ReleaseLedger<'r, R> {
    pub fn new(raster: &'r R) -> Self {
        Self {
            raster,
            pending: VecDeque::new(),
        }
    }

    pub fn push(&mut self, entry: CapturedViewport<R::Bitmap>) {
        self.pending.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Hand out the oldest entry; the caller becomes responsible for releasing it.
    pub fn take_next(&mut self) -> Option<CapturedViewport<R::Bitmap>> {
        self.pending.pop_front()
    }

    /// Release everything still pending, returning how many were released
    pub fn drain(&mut self) -> usize {
        let n = self.pending.len();
        for entry in self.pending.drain(..) {
            self.raster.release(entry.bitmap);
        }
        n
    }
}

impl<R: Raster> Drop for ReleaseLedger<'_, R> {
    fn drop(&mut self) {
        let released = self.drain();
        if released > 0 {
            debug!("released {} pending bitmap(s) during cleanup", released);
        }
    }
}

/// Draw every pending entry onto a fresh `canvas_width x canvas_height`
/// surface, releasing each bitmap right after it is drawn.
///
/// Peak memory stays at one canvas plus one in-flight bitmap on top of
/// whatever the ledger still holds.
pub fn compose<R: Raster>(raster: &R, plan: &CapturePlan, ledger: &mut ReleaseLedger<'_, R>) -> Result<R::Surface> {
    let mut surface = raster
        .create_surface(plan.canvas_width, plan.canvas_height)
        .ok_or_else(|| {
            Error::StitchContextUnavailable(format!("no {}x{} surface", plan.canvas_width, plan.canvas_height))
        })?;

    while let Some(CapturedViewport { bitmap, y_offset }) = ledger.take_next() {
        raster.draw(&mut surface, &bitmap, 0, y_offset);
        raster.release(bitmap);
    }

    Ok(surface)
}

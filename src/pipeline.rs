//! Full-page capture orchestrator
//!
//! ```text
//! Idle -> MeasuringPage -> Settling
//!      -> { [Scrolling -> Settling] -> Capturing -> Decoding -> [Cropping] }*
//!      -> Stitching -> Exporting -> Done
//!                                   Failed (from any step)
//! Done | Failed -> Restoring -> Terminal
//! ```
//!
//! Steps run strictly one after another: the visible-capture primitive allows
//! a single active capture per browser session, and paint has to finish
//! before the capture that follows a scroll.
//!
//! Two runs on different tabs share nothing and may run concurrently. Two runs
//! on the same tab would both scroll one page and race on the recorded
//! original scroll position; callers that can issue those should go through
//! [`TabLocks`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, info, warn};
use tokio::sync::OwnedMutexGuard;

use crate::compositor::{compose, CapturePlan, CapturedViewport, ReleaseLedger};
use crate::host::{capture_failed, EncodedImage, ScriptHost, VisibleCapture};
use crate::page::{get_page_metrics, restore_scroll, scroll_to, settle, PageMetrics};
use crate::raster::{CropRect, Raster};
use crate::{CaptureOptions, JpegImage, JpegQuality, Result, TabId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    MeasuringPage,
    Scrolling { index: usize },
    Settling,
    Capturing { index: usize },
    Decoding { index: usize },
    Cropping { index: usize },
    Stitching,
    Exporting,
    Done,
    Failed,
    Restoring,
    Terminal,
}

/// One full-page capture run against one tab.
///
/// A pipeline is single-use in spirit: [`CapturePipeline::run`] can be called
/// again, but the state history then covers both runs.
pub struct CapturePipeline<'a, H, R> {
    host: &'a H,
    raster: &'a R,
    options: CaptureOptions,
    state: PipelineState,
    history: Vec<PipelineState>,
}

impl<'a, H, R> CapturePipeline<'a, H, R>
where
    H: ScriptHost + VisibleCapture,
    R: Raster,
{
    pub fn new(host: &'a H, raster: &'a R, options: CaptureOptions) -> Self {
        Self {
            host,
            raster,
            options,
            state: PipelineState::Idle,
            history: vec![PipelineState::Idle],
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Every state entered so far, in order
    pub fn history(&self) -> &[PipelineState] {
        &self.history
    }

    fn enter(&mut self, next: PipelineState) {
        debug!("capture pipeline: {:?} -> {:?}", self.state, next);
        self.state = next;
        self.history.push(next);
    }

    /// Capture `tab` top to bottom and return the stitched JPEG.
    ///
    /// Once the page has been measured its original scroll position is
    /// restored exactly once, whatever the outcome; a failed restore is
    /// logged and never replaces the result.
    pub async fn run(&mut self, tab: TabId) -> Result<JpegImage> {
        info!("{}: full-page capture at quality {}", tab, self.options.quality.get());

        self.enter(PipelineState::MeasuringPage);
        let metrics = match get_page_metrics(self.host, tab).await {
            Ok(m) => m,
            Err(e) => {
                // nothing was scrolled yet, so there is nothing to restore
                self.enter(PipelineState::Failed);
                self.enter(PipelineState::Terminal);
                return Err(e);
            }
        };

        let outcome = self.capture_and_stitch(tab, &metrics).await;
        self.enter(match outcome {
            Ok(_) => PipelineState::Done,
            Err(_) => PipelineState::Failed,
        });

        self.enter(PipelineState::Restoring);
        if let Err(e) = restore_scroll(self.host, tab, metrics.original_scroll_x, metrics.original_scroll_y).await {
            warn!(
                "{}: could not restore scroll position ({}, {}): {}",
                tab, metrics.original_scroll_x, metrics.original_scroll_y, e
            );
        }
        self.enter(PipelineState::Terminal);

        match &outcome {
            Ok(image) => info!("{}: captured {}x{} ({} bytes)", tab, image.width, image.height, image.jpeg.len()),
            Err(e) => warn!("{}: full-page capture failed: {}", tab, e),
        }
        outcome
    }

    async fn capture_and_stitch(&mut self, tab: TabId, metrics: &PageMetrics) -> Result<JpegImage> {
        let (host, raster) = (self.host, self.raster);

        // the probe just scrolled to the origin
        self.enter(PipelineState::Settling);
        settle(self.options.settle).await;

        let plan = CapturePlan::new(metrics, self.options.max_screens)?;
        debug!(
            "{}: {} capture(s) onto a {}x{} canvas",
            tab, plan.total_captures, plan.canvas_width, plan.canvas_height
        );

        let mut ledger = ReleaseLedger::new(raster);

        for step in plan.steps() {
            if !step.is_first() {
                self.enter(PipelineState::Scrolling { index: step.index });
                scroll_to(host, tab, step.scroll_y_css).await?;
                self.enter(PipelineState::Settling);
                settle(self.options.settle).await;
            }

            self.enter(PipelineState::Capturing { index: step.index });
            let data_uri = host
                .capture_visible(tab, self.options.quality)
                .await
                .map_err(capture_failed)?;

            self.enter(PipelineState::Decoding { index: step.index });
            let bitmap = {
                let encoded = EncodedImage::from_data_uri(&data_uri)?;
                drop(data_uri);
                raster.decode(&encoded)?
            };

            let bitmap = match step.crop_height {
                Some(crop_height) => {
                    self.enter(PipelineState::Cropping { index: step.index });
                    let (width, height) = raster.dimensions(&bitmap);
                    let cropped = raster.crop(&bitmap, CropRect::bottom(width, height, crop_height));
                    raster.release(bitmap);
                    cropped?
                }
                None => bitmap,
            };

            ledger.push(CapturedViewport {
                bitmap,
                y_offset: step.y_offset,
            });
        }

        self.enter(PipelineState::Stitching);
        let surface = compose(raster, &plan, &mut ledger)?;

        self.enter(PipelineState::Exporting);
        let jpeg = raster.export_jpeg(surface, self.options.quality.fraction())?;

        Ok(JpegImage {
            width: plan.canvas_width,
            height: plan.canvas_height,
            jpeg,
        })
    }
}

/// Capture the whole page in `tab` as one JPEG.
pub async fn capture_full_page<H, R>(host: &H, raster: &R, tab: TabId, options: &CaptureOptions) -> Result<JpegImage>
where
    H: ScriptHost + VisibleCapture,
    R: Raster,
{
    CapturePipeline::new(host, raster, options.clone()).run(tab).await
}

/// Capture only what `tab` currently shows, as the encoded JPEG bytes.
pub async fn capture_visible_jpeg<H: VisibleCapture>(host: &H, tab: TabId, quality: JpegQuality) -> Result<Vec<u8>> {
    let data_uri = host.capture_visible(tab, quality).await.map_err(capture_failed)?;
    Ok(EncodedImage::from_data_uri(&data_uri)?.bytes)
}

/// Per-tab serialization of capture runs.
///
/// Runs on the same tab queue behind each other; runs on different tabs do
/// not contend.
#[derive(Default)]
pub struct TabLocks {
    locks: Mutex<HashMap<TabId, Arc<tokio::sync::Mutex<()>>>>,
}

impl TabLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other holder captures `tab`
    pub async fn acquire(&self, tab: TabId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(tab).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// [`capture_full_page`] while holding the lock for `tab`
    pub async fn capture_full_page<H, R>(&self, host: &H, raster: &R, tab: TabId, options: &CaptureOptions) -> Result<JpegImage>
    where
        H: ScriptHost + VisibleCapture,
        R: Raster,
    {
        let _guard = self.acquire(tab).await;
        capture_full_page(host, raster, tab, options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::PageOp;
    use crate::recording::{HostCall, RasterCall, RecordingHost, RecordingRaster};
    use crate::{Error, SCROLL_SETTLE};
    use std::time::Duration;

    fn single_viewport() -> PageMetrics {
        PageMetrics {
            scroll_width: 1024.0,
            scroll_height: 768.0,
            viewport_width: 1024.0,
            viewport_height: 768.0,
            original_scroll_x: 0.0,
            original_scroll_y: 0.0,
            device_pixel_ratio: 1.0,
        }
    }

    fn two_and_a_half_viewports() -> PageMetrics {
        PageMetrics {
            scroll_width: 800.0,
            scroll_height: 1920.0,
            viewport_width: 800.0,
            viewport_height: 768.0,
            original_scroll_x: 5.0,
            original_scroll_y: 100.0,
            device_pixel_ratio: 2.0,
        }
    }

    fn options(quality: u8) -> CaptureOptions {
        CaptureOptions {
            quality: JpegQuality::new(quality).unwrap(),
            ..Default::default()
        }
    }

    fn surface_and_export(raster: &RecordingRaster) -> (Option<(u32, u32)>, Option<f32>) {
        let calls = raster.calls();
        let surface = calls.iter().find_map(|c| match c {
            RasterCall::CreateSurface { width, height } => Some((*width, *height)),
            _ => None,
        });
        let export = calls.iter().find_map(|c| match c {
            RasterCall::Export { quality } => Some(*quality),
            _ => None,
        });
        (surface, export)
    }

    #[tokio::test(start_paused = true)]
    async fn single_viewport_page_is_captured_once() {
        let host = RecordingHost::new(single_viewport());
        let raster = RecordingRaster::new(1024, 768);

        let image = capture_full_page(&host, &raster, TabId(42), &options(90)).await.unwrap();

        assert_eq!((image.width, image.height), (1024, 768));
        assert_eq!(image.jpeg, vec![0xFF, 0xD8, 0xFF, 0xD9]);
        assert_eq!(host.capture_count(), 1);
        assert_eq!(surface_and_export(&raster), (Some((1024, 768)), Some(0.9)));
        assert_eq!(raster.live_bitmaps(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn tall_page_is_scrolled_captured_and_stitched() {
        let host = RecordingHost::new(two_and_a_half_viewports());
        let raster = RecordingRaster::new(1600, 1536);

        let image = capture_full_page(&host, &raster, TabId(42), &options(80)).await.unwrap();

        assert_eq!((image.width, image.height), (1600, 3840));
        assert_eq!(host.capture_count(), 3);
        assert_eq!(surface_and_export(&raster), (Some((1600, 3840)), Some(0.8)));
        assert_eq!(
            host.calls_for(TabId(42)),
            vec![
                HostCall::Execute(TabId(42), PageOp::Measure),
                HostCall::Capture(TabId(42), JpegQuality::new(80).unwrap()),
                HostCall::Execute(TabId(42), PageOp::ScrollTo { x: 0.0, y: 768.0 }),
                HostCall::Capture(TabId(42), JpegQuality::new(80).unwrap()),
                HostCall::Execute(TabId(42), PageOp::ScrollTo { x: 0.0, y: 1536.0 }),
                HostCall::Capture(TabId(42), JpegQuality::new(80).unwrap()),
                HostCall::Execute(TabId(42), PageOp::ScrollTo { x: 5.0, y: 100.0 }),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn last_partial_capture_is_cropped_from_the_bottom() {
        let host = RecordingHost::new(two_and_a_half_viewports());
        let raster = RecordingRaster::new(1600, 1536);

        capture_full_page(&host, &raster, TabId(42), &options(85)).await.unwrap();

        let calls = raster.calls();
        let crops: Vec<_> = calls.iter().filter(|c| matches!(c, RasterCall::Crop { .. })).collect();
        assert_eq!(crops.len(), 1);
        let RasterCall::Crop { source, id, rect } = crops[0].clone() else { unreachable!() };
        assert_eq!(rect, CropRect { x: 0, y: 768, width: 1600, height: 768 });

        // the uncropped source goes back right away, before anything is drawn
        let released_at = calls.iter().position(|c| *c == RasterCall::Release { id: source }).unwrap();
        let first_draw = calls.iter().position(|c| matches!(c, RasterCall::Draw { .. })).unwrap();
        assert!(released_at < first_draw);
        assert!(calls.contains(&RasterCall::Draw { id, x: 0, y: 3072 }));
    }

    #[tokio::test(start_paused = true)]
    async fn every_bitmap_is_released_exactly_once_after_drawing() {
        let host = RecordingHost::new(two_and_a_half_viewports());
        let raster = RecordingRaster::new(1600, 1536);

        capture_full_page(&host, &raster, TabId(1), &options(90)).await.unwrap();

        let calls = raster.calls();
        // 3 decodes + 1 crop = 4 bitmaps, 4 releases
        assert_eq!(raster.release_count(), 4);
        assert_eq!(raster.live_bitmaps(), 0);
        for (i, call) in calls.iter().enumerate() {
            if let RasterCall::Draw { id, .. } = call {
                assert_eq!(calls[i + 1], RasterCall::Release { id: *id });
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn capture_failure_releases_prior_bitmaps_and_restores() {
        let metrics = PageMetrics {
            scroll_height: 768.0 * 3.0,
            original_scroll_y: 40.0,
            ..single_viewport()
        };
        let host = RecordingHost::new(metrics).with_frames(vec![
            Ok("data:image/jpeg;base64,/9j/2Q==".to_string()),
            Ok("data:image/jpeg;base64,/9j/2Q==".to_string()),
            Err(Error::CaptureFailed("Capture failed".into())),
        ]);
        let raster = RecordingRaster::new(1024, 768);

        let err = capture_full_page(&host, &raster, TabId(7), &options(90)).await.unwrap_err();

        assert!(matches!(err, Error::CaptureFailed(ref m) if m == "Capture failed"));
        assert_eq!(raster.release_count(), 2);
        assert_eq!(raster.live_bitmaps(), 0);
        assert!(!raster.calls().iter().any(|c| matches!(c, RasterCall::CreateSurface { .. })));
        assert_eq!(host.scrolls().last(), Some(&(0.0, 40.0)));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_surface_fails_after_capturing_and_cleans_up() {
        let host = RecordingHost::new(single_viewport());
        let raster = RecordingRaster::new(1024, 768).without_surface();

        let err = capture_full_page(&host, &raster, TabId(42), &options(90)).await.unwrap_err();

        assert!(matches!(err, Error::StitchContextUnavailable(_)));
        assert!(err.to_string().starts_with("Failed to create 2D context for stitching"));
        assert_eq!(raster.release_count(), 1);
        assert_eq!(host.scrolls(), vec![(0.0, 0.0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn export_failure_still_restores_scroll() {
        let metrics = PageMetrics {
            original_scroll_y: 50.0,
            ..single_viewport()
        };
        let host = RecordingHost::new(metrics);
        let raster = RecordingRaster::new(1024, 768).failing_export("convertToBlob failed");

        let err = capture_full_page(&host, &raster, TabId(42), &options(90)).await.unwrap_err();

        assert!(matches!(err, Error::EncodeFailed(ref m) if m == "convertToBlob failed"));
        assert_eq!(host.scrolls(), vec![(0.0, 50.0)]);
        assert_eq!(raster.live_bitmaps(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn restore_failure_never_masks_the_result() {
        // execute #0 is the probe, #1 the restore
        let host = RecordingHost::new(single_viewport()).failing_executes_from(1);
        let raster = RecordingRaster::new(1024, 768);

        let image = capture_full_page(&host, &raster, TabId(42), &options(90)).await.unwrap();
        assert_eq!(image.height, 768);

        let host = RecordingHost::new(single_viewport()).failing_executes_from(1);
        let raster = RecordingRaster::new(1024, 768).failing_export("disk full");
        let err = capture_full_page(&host, &raster, TabId(42), &options(90)).await.unwrap_err();
        assert!(matches!(err, Error::EncodeFailed(ref m) if m == "disk full"));
    }

    #[tokio::test(start_paused = true)]
    async fn scroll_failure_aborts_and_cleans_up() {
        let metrics = PageMetrics {
            scroll_height: 2000.0,
            ..single_viewport()
        };
        // probe ok, first scroll rejected, restore rejected too
        let host = RecordingHost::new(metrics).failing_executes_from(1);
        let raster = RecordingRaster::new(1024, 768);

        let err = capture_full_page(&host, &raster, TabId(3), &options(90)).await.unwrap_err();

        assert!(matches!(err, Error::ScriptError(_)));
        assert_eq!(host.capture_count(), 1);
        assert_eq!(raster.release_count(), 1);
        assert_eq!(host.scrolls(), vec![(0.0, 768.0), (0.0, 0.0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn unmeasurable_page_is_not_captured_or_restored() {
        let host = RecordingHost::new(single_viewport()).with_measure_results(vec![]);
        let raster = RecordingRaster::new(1024, 768);
        let mut pipeline = CapturePipeline::new(&host, &raster, options(90));

        let err = pipeline.run(TabId(42)).await.unwrap_err();

        assert!(matches!(err, Error::MetricsUnavailable(_)));
        assert_eq!(host.capture_count(), 0);
        assert!(host.scrolls().is_empty());
        assert_eq!(
            pipeline.history(),
            &[PipelineState::Idle, PipelineState::MeasuringPage, PipelineState::Failed, PipelineState::Terminal]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn state_history_follows_the_capture_loop() {
        let metrics = PageMetrics {
            scroll_height: 1000.0,
            ..single_viewport()
        };
        let host = RecordingHost::new(metrics);
        let raster = RecordingRaster::new(1024, 768);
        let mut pipeline = CapturePipeline::new(&host, &raster, options(90));

        pipeline.run(TabId(9)).await.unwrap();

        use PipelineState::*;
        assert_eq!(
            pipeline.history(),
            &[
                Idle,
                MeasuringPage,
                Settling,
                Capturing { index: 0 },
                Decoding { index: 0 },
                Scrolling { index: 1 },
                Settling,
                Capturing { index: 1 },
                Decoding { index: 1 },
                Cropping { index: 1 },
                Stitching,
                Exporting,
                Done,
                Restoring,
                Terminal,
            ]
        );
        assert_eq!(pipeline.state(), Terminal);
    }

    #[tokio::test(start_paused = true)]
    async fn settles_after_probe_and_after_every_scroll() {
        let host = RecordingHost::new(two_and_a_half_viewports());
        let raster = RecordingRaster::new(1600, 1536);

        let start = tokio::time::Instant::now();
        capture_full_page(&host, &raster, TabId(1), &options(90)).await.unwrap();
        assert!(start.elapsed() >= SCROLL_SETTLE * 3);
    }

    #[tokio::test(start_paused = true)]
    async fn screen_cap_limits_captures() {
        let metrics = PageMetrics {
            scroll_height: 768.0 * 10.0,
            ..single_viewport()
        };
        let host = RecordingHost::new(metrics);
        let raster = RecordingRaster::new(1024, 768);
        let opts = CaptureOptions {
            max_screens: Some(4),
            settle: Duration::ZERO,
            ..options(90)
        };

        let image = capture_full_page(&host, &raster, TabId(1), &opts).await.unwrap();
        assert_eq!(host.capture_count(), 4);
        assert_eq!(image.height, 768 * 4);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_runs_produce_identical_dimensions() {
        let host = RecordingHost::new(two_and_a_half_viewports());
        let raster = RecordingRaster::new(1600, 1536);

        let a = capture_full_page(&host, &raster, TabId(5), &options(90)).await.unwrap();
        let b = capture_full_page(&host, &raster, TabId(5), &options(90)).await.unwrap();
        assert_eq!((a.width, a.height), (b.width, b.height));
    }

    #[tokio::test(start_paused = true)]
    async fn different_tabs_capture_concurrently() {
        let host = RecordingHost::new(two_and_a_half_viewports());
        let raster = RecordingRaster::new(1600, 1536);
        let opts = options(90);

        let (a, b) = tokio::join!(
            capture_full_page(&host, &raster, TabId(1), &opts),
            capture_full_page(&host, &raster, TabId(2), &opts),
        );
        assert!(a.is_ok() && b.is_ok());
        for tab in [TabId(1), TabId(2)] {
            let calls = host.calls_for(tab);
            assert_eq!(calls.last(), Some(&HostCall::Execute(tab, PageOp::ScrollTo { x: 5.0, y: 100.0 })));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn tab_locks_serialize_runs_on_one_tab() {
        let host = RecordingHost::new(two_and_a_half_viewports());
        let raster = RecordingRaster::new(1600, 1536);
        let locks = TabLocks::new();
        let opts = options(90);

        let (a, b) = tokio::join!(
            locks.capture_full_page(&host, &raster, TabId(1), &opts),
            locks.capture_full_page(&host, &raster, TabId(1), &opts),
        );
        assert!(a.is_ok() && b.is_ok());

        // the second run only measures after the first one restored
        let calls = host.calls();
        let measures: Vec<_> = calls
            .iter()
            .enumerate()
            .filter(|(_, c)| matches!(c, HostCall::Execute(_, PageOp::Measure)))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(measures.len(), 2);
        assert_eq!(calls[measures[1] - 1], HostCall::Execute(TabId(1), PageOp::ScrollTo { x: 5.0, y: 100.0 }));
    }

    #[tokio::test]
    async fn visible_capture_returns_decoded_bytes() {
        let host = RecordingHost::new(single_viewport()).with_default_frame("data:image/jpeg;base64,aGVsbG8=");
        let bytes = capture_visible_jpeg(&host, TabId(1), JpegQuality::default()).await.unwrap();
        assert_eq!(bytes, b"hello");

        let host = RecordingHost::new(single_viewport())
            .with_frames(vec![Err(Error::Other("tab closed".into()))]);
        let err = capture_visible_jpeg(&host, TabId(1), JpegQuality::default()).await.unwrap_err();
        assert!(matches!(err, Error::CaptureFailed(ref m) if m == "tab closed"));
    }
}

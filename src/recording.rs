//! In-memory host and raster doubles that record every call
//!
//! Used by the unit and integration tests to assert call counts and
//! arguments, and handy as a dry-run backend when no browser is available.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;

use crate::host::{EncodedImage, PageOp, ScriptHost, VisibleCapture};
use crate::page::PageMetrics;
use crate::raster::{CropRect, Raster};
use crate::{Error, JpegQuality, Result, TabId};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A call observed by [`RecordingHost`]
#[derive(Debug, Clone, PartialEq)]
pub enum HostCall {
    Execute(TabId, PageOp),
    Capture(TabId, JpegQuality),
}

/// Scripted host: answers `Measure` with fixed metrics, serves captures from
/// a queue (falling back to a default frame) and records every call.
pub struct RecordingHost {
    measure_results: Vec<Value>,
    frames: Mutex<VecDeque<Result<String>>>,
    default_frame: String,
    fail_executes_from: Option<usize>,
    calls: Mutex<Vec<HostCall>>,
}

impl RecordingHost {
    pub fn new(metrics: PageMetrics) -> Self {
        let payload = serde_json::to_value(metrics).unwrap_or(Value::Null);
        Self {
            measure_results: vec![payload],
            frames: Mutex::new(VecDeque::new()),
            default_frame: "data:image/jpeg;base64,/9j/2Q==".to_string(),
            fail_executes_from: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Replace the raw result list returned for `Measure`
    pub fn with_measure_results(mut self, results: Vec<Value>) -> Self {
        self.measure_results = results;
        self
    }

    /// Frame returned once the scripted queue is exhausted
    pub fn with_default_frame(mut self, data_uri: impl Into<String>) -> Self {
        self.default_frame = data_uri.into();
        self
    }

    /// Queue capture outcomes, served in order
    pub fn with_frames(self, frames: impl IntoIterator<Item = Result<String>>) -> Self {
        lock(&self.frames).extend(frames);
        self
    }

    /// Reject every `execute` call from the `n`th one (0-based) onwards
    pub fn failing_executes_from(mut self, n: usize) -> Self {
        self.fail_executes_from = Some(n);
        self
    }

    pub fn calls(&self) -> Vec<HostCall> {
        lock(&self.calls).clone()
    }

    pub fn calls_for(&self, tab: TabId) -> Vec<HostCall> {
        self.calls()
            .into_iter()
            .filter(|c| match c {
                HostCall::Execute(t, _) | HostCall::Capture(t, _) => *t == tab,
            })
            .collect()
    }

    pub fn capture_count(&self) -> usize {
        self.calls().iter().filter(|c| matches!(c, HostCall::Capture(..))).count()
    }

    /// Every `ScrollTo` issued, as `(x, y)`
    pub fn scrolls(&self) -> Vec<(f64, f64)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                HostCall::Execute(_, PageOp::ScrollTo { x, y }) => Some((x, y)),
                _ => None,
            })
            .collect()
    }
}

impl ScriptHost for RecordingHost {
    async fn execute(&self, tab: TabId, op: &PageOp) -> Result<Vec<Value>> {
        let index = {
            let mut calls = lock(&self.calls);
            let index = calls.iter().filter(|c| matches!(c, HostCall::Execute(..))).count();
            calls.push(HostCall::Execute(tab, op.clone()));
            index
        };

        if self.fail_executes_from.is_some_and(|n| index >= n) {
            return Err(Error::ScriptError(format!("{} is not scriptable", tab)));
        }

        match op {
            PageOp::Measure => Ok(self.measure_results.clone()),
            PageOp::ScrollTo { .. } => Ok(vec![Value::Bool(true)]),
        }
    }
}

impl VisibleCapture for RecordingHost {
    async fn capture_visible(&self, tab: TabId, quality: JpegQuality) -> Result<String> {
        lock(&self.calls).push(HostCall::Capture(tab, quality));
        match lock(&self.frames).pop_front() {
            Some(frame) => frame,
            None => Ok(self.default_frame.clone()),
        }
    }
}

/// A call observed by [`RecordingRaster`]
#[derive(Debug, Clone, PartialEq)]
pub enum RasterCall {
    Decode { id: usize },
    Crop { source: usize, id: usize, rect: CropRect },
    Release { id: usize },
    CreateSurface { width: u32, height: u32 },
    Draw { id: usize, x: u32, y: u32 },
    Export { quality: f32 },
}

/// Bitmap handle minted by [`RecordingRaster`]
#[derive(Debug, PartialEq, Eq)]
pub struct FakeBitmap {
    pub id: usize,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug)]
pub struct FakeSurface {
    pub width: u32,
    pub height: u32,
}

/// Raster double: every decode yields a `width x height` bitmap, nothing is
/// actually drawn, and bitmap lifetimes are tracked.
pub struct RecordingRaster {
    width: u32,
    height: u32,
    surface_available: bool,
    export_error: Option<String>,
    next_id: AtomicUsize,
    live: Mutex<HashSet<usize>>,
    calls: Mutex<Vec<RasterCall>>,
}

impl RecordingRaster {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            surface_available: true,
            export_error: None,
            next_id: AtomicUsize::new(0),
            live: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Make `create_surface` always fail
    pub fn without_surface(mut self) -> Self {
        self.surface_available = false;
        self
    }

    /// Make `export_jpeg` fail with `message`
    pub fn failing_export(mut self, message: impl Into<String>) -> Self {
        self.export_error = Some(message.into());
        self
    }

    fn mint(&self, width: u32, height: u32) -> FakeBitmap {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        lock(&self.live).insert(id);
        FakeBitmap { id, width, height }
    }

    /// A fresh full-size bitmap, outside of any decode
    pub fn bitmap(&self) -> FakeBitmap {
        self.mint(self.width, self.height)
    }

    pub fn calls(&self) -> Vec<RasterCall> {
        lock(&self.calls).clone()
    }

    pub fn release_count(&self) -> usize {
        self.calls().iter().filter(|c| matches!(c, RasterCall::Release { .. })).count()
    }

    /// Bitmaps minted but not yet released
    pub fn live_bitmaps(&self) -> usize {
        lock(&self.live).len()
    }
}

impl Raster for RecordingRaster {
    type Bitmap = FakeBitmap;
    type Surface = FakeSurface;

    fn decode(&self, _encoded: &EncodedImage) -> Result<FakeBitmap> {
        let bitmap = self.bitmap();
        lock(&self.calls).push(RasterCall::Decode { id: bitmap.id });
        Ok(bitmap)
    }

    fn dimensions(&self, bitmap: &FakeBitmap) -> (u32, u32) {
        (bitmap.width, bitmap.height)
    }

    fn crop(&self, bitmap: &FakeBitmap, rect: CropRect) -> Result<FakeBitmap> {
        let cropped = self.mint(rect.width, rect.height);
        lock(&self.calls).push(RasterCall::Crop {
            source: bitmap.id,
            id: cropped.id,
            rect,
        });
        Ok(cropped)
    }

    fn release(&self, bitmap: FakeBitmap) {
        lock(&self.live).remove(&bitmap.id);
        lock(&self.calls).push(RasterCall::Release { id: bitmap.id });
    }

    fn create_surface(&self, width: u32, height: u32) -> Option<FakeSurface> {
        lock(&self.calls).push(RasterCall::CreateSurface { width, height });
        self.surface_available.then_some(FakeSurface { width, height })
    }

    fn draw(&self, _surface: &mut FakeSurface, bitmap: &FakeBitmap, x: u32, y: u32) {
        lock(&self.calls).push(RasterCall::Draw { id: bitmap.id, x, y });
    }

    fn export_jpeg(&self, _surface: FakeSurface, quality: f32) -> Result<Vec<u8>> {
        lock(&self.calls).push(RasterCall::Export { quality });
        match &self.export_error {
            Some(message) => Err(Error::EncodeFailed(message.clone())),
            None => Ok(vec![0xFF, 0xD8, 0xFF, 0xD9]),
        }
    }
}

//! Raster primitives: decode, crop, composite, export
//!
//! [`Raster`] is the seam between the pipeline and whatever actually holds
//! pixels. Bitmaps are owned resources: every bitmap handed out by
//! [`Raster::decode`] or [`Raster::crop`] must be given back exactly once
//! through [`Raster::release`]. Taking the bitmap by value makes a double
//! release impossible; [`crate::compositor::ReleaseLedger`] makes sure none is
//! forgotten.

use crate::host::EncodedImage;
use crate::Result;

pub mod image_raster;

pub use image_raster::ImageRaster;

/// A sub-rectangle of a bitmap, in physical pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRect {
    /// Full-width strip covering the bottom `height` rows of a
    /// `width x bitmap_height` bitmap. `height` is clamped to the bitmap.
    pub fn bottom(width: u32, bitmap_height: u32, height: u32) -> Self {
        let height = height.min(bitmap_height);
        Self {
            x: 0,
            y: bitmap_height - height,
            width,
            height,
        }
    }
}

pub trait Raster {
    type Bitmap;
    type Surface;

    /// Decode an encoded capture into a bitmap at native capture resolution
    fn decode(&self, encoded: &EncodedImage) -> Result<Self::Bitmap>;

    /// Pixel dimensions `(width, height)` of a bitmap
    fn dimensions(&self, bitmap: &Self::Bitmap) -> (u32, u32);

    /// Copy a sub-rectangle into a new, independently owned bitmap.
    ///
    /// The source stays owned by the caller and still has to be released.
    fn crop(&self, bitmap: &Self::Bitmap, rect: CropRect) -> Result<Self::Bitmap>;

    /// Give a bitmap back
    fn release(&self, bitmap: Self::Bitmap);

    /// Allocate a drawing surface; `None` when no surface of that size can be
    /// provided
    fn create_surface(&self, width: u32, height: u32) -> Option<Self::Surface>;

    /// Draw `bitmap` with its top-left corner at `(x, y)`
    fn draw(&self, surface: &mut Self::Surface, bitmap: &Self::Bitmap, x: u32, y: u32);

    /// Encode the surface as JPEG; `quality` is a 0.01–1.0 fraction
    fn export_jpeg(&self, surface: Self::Surface, quality: f32) -> Result<Vec<u8>>;
}

//! [`Raster`] backed by the `image` crate (CPU, RGB8)

use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder, ImageFormat, RgbImage};

use super::{CropRect, Raster};
use crate::host::EncodedImage;
use crate::{Error, Result};

/// Largest edge a baseline JPEG can describe
pub const MAX_SURFACE_EDGE: u32 = 65_535;

/// In-process raster backend. Bitmaps and surfaces are plain `RgbImage`s;
/// releasing a bitmap frees its buffer.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageRaster;

impl Raster for ImageRaster {
    type Bitmap = RgbImage;
    type Surface = RgbImage;

    fn decode(&self, encoded: &EncodedImage) -> Result<RgbImage> {
        let decoded = match ImageFormat::from_mime_type(&encoded.mime) {
            Some(format) => image::load_from_memory_with_format(&encoded.bytes, format),
            None => image::load_from_memory(&encoded.bytes),
        }
        .map_err(|e| Error::DecodeFailed(format!("{} ({} bytes): {}", encoded.mime, encoded.bytes.len(), e)))?;
        Ok(decoded.into_rgb8())
    }

    fn dimensions(&self, bitmap: &RgbImage) -> (u32, u32) {
        bitmap.dimensions()
    }

    fn crop(&self, bitmap: &RgbImage, rect: CropRect) -> Result<RgbImage> {
        let (w, h) = bitmap.dimensions();
        let fits = rect.width > 0
            && rect.height > 0
            && rect.x.checked_add(rect.width).is_some_and(|r| r <= w)
            && rect.y.checked_add(rect.height).is_some_and(|b| b <= h);
        if !fits {
            return Err(Error::DecodeFailed(format!(
                "crop {:?} outside {}x{} bitmap",
                rect, w, h
            )));
        }
        Ok(image::imageops::crop_imm(bitmap, rect.x, rect.y, rect.width, rect.height).to_image())
    }

    fn release(&self, bitmap: RgbImage) {
        drop(bitmap);
    }

    fn create_surface(&self, width: u32, height: u32) -> Option<RgbImage> {
        if width == 0 || height == 0 || width > MAX_SURFACE_EDGE || height > MAX_SURFACE_EDGE {
            return None;
        }
        let bytes = u64::from(width) * u64::from(height) * 3;
        if usize::try_from(bytes).is_err() {
            return None;
        }
        Some(RgbImage::new(width, height))
    }

    fn draw(&self, surface: &mut RgbImage, bitmap: &RgbImage, x: u32, y: u32) {
        image::imageops::replace(surface, bitmap, i64::from(x), i64::from(y));
    }

    fn export_jpeg(&self, surface: RgbImage, quality: f32) -> Result<Vec<u8>> {
        let quality = (quality * 100.0).round().clamp(1.0, 100.0) as u8;
        let (w, h) = surface.dimensions();
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, quality)
            .write_image(surface.as_raw(), w, h, ExtendedColorType::Rgb8)
            .map_err(|e| Error::EncodeFailed(e.to_string()))?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn solid_jpeg(width: u32, height: u32, color: [u8; 3]) -> EncodedImage {
        let img = RgbImage::from_pixel(width, height, Rgb(color));
        let mut bytes = Vec::new();
        JpegEncoder::new_with_quality(&mut bytes, 95)
            .write_image(img.as_raw(), width, height, ExtendedColorType::Rgb8)
            .unwrap();
        EncodedImage { mime: "image/jpeg".into(), bytes }
    }

    fn close(a: &Rgb<u8>, b: [u8; 3]) -> bool {
        a.0.iter().zip(b).all(|(x, y)| x.abs_diff(y) <= 16)
    }

    #[test]
    fn decode_keeps_native_resolution() {
        let raster = ImageRaster;
        let bmp = raster.decode(&solid_jpeg(64, 48, [200, 10, 10])).unwrap();
        assert_eq!(raster.dimensions(&bmp), (64, 48));
        assert!(close(bmp.get_pixel(10, 10), [200, 10, 10]));
    }

    #[test]
    fn decode_rejects_garbage() {
        let raster = ImageRaster;
        let err = raster
            .decode(&EncodedImage { mime: "image/jpeg".into(), bytes: vec![1, 2, 3] })
            .unwrap_err();
        assert!(matches!(err, Error::DecodeFailed(_)));
    }

    #[test]
    fn crop_is_an_independent_copy() {
        let raster = ImageRaster;
        let mut src = RgbImage::from_pixel(4, 4, Rgb([0, 0, 0]));
        src.put_pixel(0, 3, Rgb([255, 255, 255]));
        let cropped = raster.crop(&src, CropRect::bottom(4, 4, 2)).unwrap();
        raster.release(src);
        assert_eq!(cropped.dimensions(), (4, 2));
        assert_eq!(cropped.get_pixel(0, 1), &Rgb([255, 255, 255]));
    }

    #[test]
    fn crop_outside_bitmap_fails() {
        let raster = ImageRaster;
        let src = RgbImage::new(4, 4);
        let rect = CropRect { x: 0, y: 3, width: 4, height: 2 };
        assert!(raster.crop(&src, rect).is_err());
    }

    #[test]
    fn surface_limits() {
        let raster = ImageRaster;
        assert!(raster.create_surface(0, 10).is_none());
        assert!(raster.create_surface(10, MAX_SURFACE_EDGE + 1).is_none());
        assert_eq!(raster.create_surface(16, 8).map(|s| s.dimensions()), Some((16, 8)));
    }

    #[test]
    fn draw_then_export_round_trips_dimensions() {
        let raster = ImageRaster;
        let mut surface = raster.create_surface(32, 64).unwrap();
        let top = RgbImage::from_pixel(32, 32, Rgb([250, 0, 0]));
        let bottom = RgbImage::from_pixel(32, 32, Rgb([0, 0, 250]));
        raster.draw(&mut surface, &top, 0, 0);
        raster.draw(&mut surface, &bottom, 0, 32);

        let jpeg = raster.export_jpeg(surface, 0.9).unwrap();
        let back = raster
            .decode(&EncodedImage { mime: "image/jpeg".into(), bytes: jpeg })
            .unwrap();
        assert_eq!(back.dimensions(), (32, 64));
        assert!(close(back.get_pixel(16, 8), [250, 0, 0]));
        assert!(close(back.get_pixel(16, 56), [0, 0, 250]));
    }
}

//! Icon normalization: square padding and aspect-preserving scaling.
//!
//! Every resample goes through Catmull-Rom so small icons stay legible.

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};

pub const DEFAULT_STANDARD_SIZE: u32 = 256;

const RESAMPLE_FILTER: FilterType = FilterType::CatmullRom;

/// Resamples `src` to exactly `width` x `height`. Zero targets return a copy.
pub fn scale_exact(src: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    if width == 0 || height == 0 {
        return src.clone();
    }
    if src.dimensions() == (width, height) {
        return src.clone();
    }
    imageops::resize(src, width, height, RESAMPLE_FILTER)
}

/// Fits `src` inside `max_w` x `max_h` while keeping its aspect ratio.
///
/// The limiting dimension lands exactly on its bound; neither output
/// dimension is ever zero.
pub fn scale_aspect_fit(src: &RgbaImage, max_w: u32, max_h: u32) -> RgbaImage {
    if max_w == 0 || max_h == 0 {
        return src.clone();
    }
    let (width, height) = fit_dimensions(src.width(), src.height(), max_w, max_h);
    scale_exact(src, width, height)
}

/// Pads `src` onto a transparent `size` x `size` canvas, scaled
/// proportionally (upscaling allowed) and centered.
pub fn standardize_to_square(src: &RgbaImage, size: u32) -> RgbaImage {
    let size = if size == 0 { DEFAULT_STANDARD_SIZE } else { size };
    let mut canvas = RgbaImage::from_pixel(size, size, Rgba([0, 0, 0, 0]));
    if src.width() == 0 || src.height() == 0 {
        return canvas;
    }

    let (scaled_w, scaled_h) = fit_dimensions(src.width(), src.height(), size, size);
    let scaled = scale_exact(src, scaled_w, scaled_h);
    let offset_x = (size - scaled_w) / 2;
    let offset_y = (size - scaled_h) / 2;
    imageops::overlay(&mut canvas, &scaled, i64::from(offset_x), i64::from(offset_y));
    canvas
}

/// Scaled dimensions for fitting `(src_w, src_h)` inside `(max_w, max_h)`,
/// truncated and floored at one pixel.
pub fn fit_dimensions(src_w: u32, src_h: u32, max_w: u32, max_h: u32) -> (u32, u32) {
    if src_w == 0 || src_h == 0 {
        return (max_w.max(1), max_h.max(1));
    }
    let scale_w = f64::from(max_w) / f64::from(src_w);
    let scale_h = f64::from(max_h) / f64::from(src_h);
    let scale = scale_w.min(scale_h);

    let width = (f64::from(src_w) * scale) as u32;
    let height = (f64::from(src_h) * scale) as u32;
    (width.max(1), height.max(1))
}

/// Opaque white square used when no icon source yields an image.
pub fn placeholder(size: u32) -> RgbaImage {
    RgbaImage::from_pixel(size, size, Rgba([255, 255, 255, 255]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba([200, 40, 40, 255]))
    }

    /// Bounding box of pixels with non-zero alpha: (min_x, min_y, max_x, max_y).
    fn opaque_bounds(image: &RgbaImage) -> (u32, u32, u32, u32) {
        let mut bounds = (u32::MAX, u32::MAX, 0, 0);
        for (x, y, pixel) in image.enumerate_pixels() {
            if pixel[3] > 0 {
                bounds.0 = bounds.0.min(x);
                bounds.1 = bounds.1.min(y);
                bounds.2 = bounds.2.max(x);
                bounds.3 = bounds.3.max(y);
            }
        }
        bounds
    }

    #[test]
    fn aspect_fit_pins_limiting_dimension() {
        let wide = solid(400, 100);
        let scaled = scale_aspect_fit(&wide, 80, 80);
        assert_eq!(scaled.dimensions(), (80, 20));

        let tall = solid(30, 90);
        let scaled = scale_aspect_fit(&tall, 100, 60);
        assert_eq!(scaled.dimensions(), (20, 60));
    }

    #[test]
    fn aspect_fit_preserves_ratio_and_never_hits_zero() {
        for (w, h, max_w, max_h) in [
            (512, 512, 37, 91),
            (1000, 3, 50, 50),
            (3, 1000, 50, 50),
            (192, 144, 17, 300),
        ] {
            let scaled = scale_aspect_fit(&solid(w, h), max_w, max_h);
            let (out_w, out_h) = scaled.dimensions();
            assert!(out_w >= 1 && out_h >= 1, "{w}x{h} -> {out_w}x{out_h}");
            assert!(out_w <= max_w && out_h <= max_h);

            let source_ratio = f64::from(w) / f64::from(h);
            let expected_h = f64::from(out_w) / source_ratio;
            if out_h > 1 && out_w > 1 {
                assert!(
                    (expected_h - f64::from(out_h)).abs() <= 1.0 + expected_h * 0.02,
                    "ratio drift for {w}x{h} -> {out_w}x{out_h}"
                );
            }
        }
    }

    #[test]
    fn aspect_fit_with_empty_bounds_is_identity() {
        let source = solid(12, 7);
        assert_eq!(scale_aspect_fit(&source, 0, 40).dimensions(), (12, 7));
    }

    #[test]
    fn standardize_always_returns_requested_square() {
        for size in [1, 17, 64, 101] {
            let squared = standardize_to_square(&solid(30, 10), size);
            assert_eq!(squared.dimensions(), (size, size));
        }
        assert_eq!(
            standardize_to_square(&solid(3, 3), 0).dimensions(),
            (DEFAULT_STANDARD_SIZE, DEFAULT_STANDARD_SIZE)
        );
    }

    #[test]
    fn standardize_centers_content_for_even_and_odd_padding() {
        // 64 - 16 = 48 (even residual); 65 - 16 = 49 (odd residual).
        for size in [64_u32, 65] {
            let squared = standardize_to_square(&solid(100, 25), size);
            let (min_x, min_y, max_x, max_y) = opaque_bounds(&squared);

            assert_eq!(min_x, 0);
            assert_eq!(max_x, size - 1);
            let top_pad = min_y as i64;
            let bottom_pad = (size - 1 - max_y) as i64;
            assert!(
                (top_pad - bottom_pad).abs() <= 1,
                "size {size}: top {top_pad} bottom {bottom_pad}"
            );
        }
    }

    #[test]
    fn standardize_upscales_small_sources() {
        let squared = standardize_to_square(&solid(4, 4), 40);
        assert_eq!(opaque_bounds(&squared), (0, 0, 39, 39));
    }
}

//! Geometric fit policies.
//!
//! `apply_fit` is a pure function from a decoded image and a target box to a
//! new image. Target dimensions of 0 mean "keep the source dimension".

use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, Rgba, RgbaImage};

const RESIZE_FILTER: FilterType = FilterType::Lanczos3;
const PAD_BACKGROUND: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Fit mode of a variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Fit {
    /// Shrink to fit inside the box, never enlarge
    #[default]
    ScaleDown,
    /// Fit inside the box, may enlarge
    Contain,
    /// Cover the box, then center-crop to it
    Cover,
    /// Center-crop to the box without resizing
    Crop,
    /// Contain, then center on a white canvas of the box size
    Pad,
}

impl Fit {
    pub const NAMES: [&'static str; 5] = ["scale-down", "contain", "cover", "crop", "pad"];

    /// Strict lookup, used to validate variant definitions.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "scale-down" => Some(Fit::ScaleDown),
            "contain" => Some(Fit::Contain),
            "cover" => Some(Fit::Cover),
            "crop" => Some(Fit::Crop),
            "pad" => Some(Fit::Pad),
            _ => None,
        }
    }

    /// Lenient lookup for delivery: anything unrecognized behaves as scale-down.
    pub fn parse(name: &str) -> Self {
        Self::from_name(name).unwrap_or_default()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Fit::ScaleDown => "scale-down",
            Fit::Contain => "contain",
            Fit::Cover => "cover",
            Fit::Crop => "crop",
            Fit::Pad => "pad",
        }
    }
}

/// Applies `fit` to `img` for a `width` x `height` target.
pub fn apply_fit(img: &DynamicImage, fit: Fit, width: u32, height: u32) -> DynamicImage {
    let (src_w, src_h) = img.dimensions();
    let target_w = if width == 0 { src_w } else { width };
    let target_h = if height == 0 { src_h } else { height };

    match fit {
        Fit::ScaleDown => scale_down(img, target_w, target_h),
        Fit::Contain => contain(img, target_w, target_h),
        Fit::Cover => cover(img, target_w, target_h),
        Fit::Crop => crop_center(img, target_w, target_h),
        Fit::Pad => pad(img, target_w, target_h),
    }
}

/// Aspect-preserving dimensions that fit inside the target box. Each side is
/// rounded to the nearest pixel and clamped to at least 1.
pub fn contain_dimensions(src_w: u32, src_h: u32, target_w: u32, target_h: u32) -> (u32, u32) {
    let scale = (target_w as f64 / src_w as f64).min(target_h as f64 / src_h as f64);
    let w = (src_w as f64 * scale).round() as u32;
    let h = (src_h as f64 * scale).round() as u32;
    (w.max(1), h.max(1))
}

/// Aspect-preserving dimensions that fully cover the target box.
pub fn cover_dimensions(src_w: u32, src_h: u32, target_w: u32, target_h: u32) -> (u32, u32) {
    let scale = (target_w as f64 / src_w as f64).max(target_h as f64 / src_h as f64);
    let w = (src_w as f64 * scale).round() as u32;
    let h = (src_h as f64 * scale).round() as u32;
    (w.max(target_w), h.max(target_h))
}

fn scale_down(img: &DynamicImage, target_w: u32, target_h: u32) -> DynamicImage {
    let (src_w, src_h) = img.dimensions();
    if src_w <= target_w && src_h <= target_h {
        return img.clone();
    }
    contain(img, target_w, target_h)
}

fn contain(img: &DynamicImage, target_w: u32, target_h: u32) -> DynamicImage {
    let (src_w, src_h) = img.dimensions();
    let (w, h) = contain_dimensions(src_w, src_h, target_w, target_h);
    if (w, h) == (src_w, src_h) {
        return img.clone();
    }
    img.resize_exact(w, h, RESIZE_FILTER)
}

fn cover(img: &DynamicImage, target_w: u32, target_h: u32) -> DynamicImage {
    let (src_w, src_h) = img.dimensions();
    let (w, h) = cover_dimensions(src_w, src_h, target_w, target_h);
    let resized = if (w, h) == (src_w, src_h) {
        img.clone()
    } else {
        img.resize_exact(w, h, RESIZE_FILTER)
    };
    crop_center(&resized, target_w, target_h)
}

/// Crops a `target_w` x `target_h` window centered on the source. Parts of
/// the window that fall outside the source are transparent.
fn crop_center(img: &DynamicImage, target_w: u32, target_h: u32) -> DynamicImage {
    let (src_w, src_h) = img.dimensions();
    if target_w <= src_w && target_h <= src_h {
        return img.crop_imm((src_w - target_w) / 2, (src_h - target_h) / 2, target_w, target_h);
    }

    let mut canvas = DynamicImage::ImageRgba8(RgbaImage::new(target_w, target_h));
    let x = (target_w as i64 - src_w as i64) / 2;
    let y = (target_h as i64 - src_h as i64) / 2;
    imageops::overlay(&mut canvas, img, x, y);
    canvas
}

fn pad(img: &DynamicImage, target_w: u32, target_h: u32) -> DynamicImage {
    let fitted = contain(img, target_w, target_h);
    let (w, h) = fitted.dimensions();

    let mut canvas =
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(target_w, target_h, PAD_BACKGROUND));
    let x = (target_w.saturating_sub(w) / 2) as i64;
    let y = (target_h.saturating_sub(h) / 2) as i64;
    imageops::overlay(&mut canvas, &fitted, x, y);
    canvas
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn solid(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([200, 30, 30])))
    }

    #[test]
    fn test_parse_defaults_to_scale_down() {
        assert_eq!(Fit::parse("cover"), Fit::Cover);
        assert_eq!(Fit::parse("stretch"), Fit::ScaleDown);
        assert_eq!(Fit::parse(""), Fit::ScaleDown);
        assert_eq!(Fit::from_name("stretch"), None);
        for name in Fit::NAMES {
            assert_eq!(Fit::parse(name).as_str(), name);
        }
    }

    #[test]
    fn test_scale_down_never_enlarges() {
        let out = apply_fit(&solid(100, 100), Fit::ScaleDown, 200, 200);
        assert_eq!(out.dimensions(), (100, 100));
    }

    #[test]
    fn test_scale_down_shrinks_to_bound() {
        let out = apply_fit(&solid(400, 200), Fit::ScaleDown, 100, 100);
        assert_eq!(out.dimensions(), (100, 50));
    }

    #[test]
    fn test_scale_down_shrinks_when_one_axis_overflows() {
        let out = apply_fit(&solid(300, 50), Fit::ScaleDown, 150, 150);
        assert_eq!(out.dimensions(), (150, 25));
    }

    #[test]
    fn test_contain_enlarges() {
        let out = apply_fit(&solid(100, 100), Fit::Contain, 200, 200);
        assert_eq!(out.dimensions(), (200, 200));
    }

    #[test]
    fn test_contain_preserves_aspect() {
        let out = apply_fit(&solid(100, 50), Fit::Contain, 300, 300);
        assert_eq!(out.dimensions(), (300, 150));
    }

    #[test]
    fn test_contain_clamps_to_one_pixel() {
        assert_eq!(contain_dimensions(1000, 1, 10, 10), (10, 1));
        assert_eq!(contain_dimensions(1, 1000, 10, 10), (1, 10));
    }

    #[test]
    fn test_cover_exact_dimensions() {
        let out = apply_fit(&solid(100, 100), Fit::Cover, 50, 80);
        assert_eq!(out.dimensions(), (50, 80));

        for (w, h) in [(640, 480), (37, 211), (300, 300), (1, 999)] {
            let out = apply_fit(&solid(120, 90), Fit::Cover, w, h);
            assert_eq!(out.dimensions(), (w, h));
        }
    }

    #[test]
    fn test_crop_inside_source() {
        let out = apply_fit(&solid(100, 80), Fit::Crop, 40, 30);
        assert_eq!(out.dimensions(), (40, 30));
    }

    #[test]
    fn test_crop_beyond_source_is_transparent() {
        let out = apply_fit(&solid(10, 10), Fit::Crop, 30, 30);
        assert_eq!(out.dimensions(), (30, 30));

        let rgba = out.to_rgba8();
        assert_eq!(rgba.get_pixel(0, 0)[3], 0);
        assert_eq!(*rgba.get_pixel(15, 15), Rgba([200, 30, 30, 255]));
    }

    #[test]
    fn test_pad_exact_dimensions_with_white_border() {
        let out = apply_fit(&solid(100, 50), Fit::Pad, 200, 200);
        assert_eq!(out.dimensions(), (200, 200));

        let rgba = out.to_rgba8();
        // Content is 200x100 centered vertically: rows 50..150
        assert_eq!(*rgba.get_pixel(100, 10), PAD_BACKGROUND);
        assert_ne!(*rgba.get_pixel(100, 100), PAD_BACKGROUND);
        assert_eq!(*rgba.get_pixel(100, 190), PAD_BACKGROUND);
    }

    #[test]
    fn test_pad_shrinks_large_source() {
        let out = apply_fit(&solid(1000, 500), Fit::Pad, 100, 100);
        assert_eq!(out.dimensions(), (100, 100));
    }

    #[test]
    fn test_zero_target_uses_source_dimension() {
        let out = apply_fit(&solid(100, 60), Fit::Contain, 50, 0);
        assert_eq!(out.dimensions(), (50, 30));

        let out = apply_fit(&solid(100, 60), Fit::Cover, 0, 0);
        assert_eq!(out.dimensions(), (100, 60));
    }
}

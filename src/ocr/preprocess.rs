use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, Rgba, RgbaImage};
use imageproc::contrast::otsu_level;
use imageproc::geometric_transformations::{warp, Interpolation, Projection};

use crate::automation::config::PixelRect;

/// Polarity of the text in a captured region.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Background {
    /// Dark text on a light background (ingredient labels)
    Light,
    /// Light text on a dark background (recipe list)
    Dark,
}

/// Options for [`prepare`].
#[derive(Clone, Debug)]
pub struct PrepareOptions {
    /// Scale factor applied before binarization; values <= 1.0 are ignored
    pub upscale: f32,
    /// Resize to this height (keeping aspect ratio) and pad with white
    pub normalize_height: Option<u32>,
    pub padding: u32,
    /// Horizontal shear correction for italic text; 0.0 disables it
    pub shear: f32,
}

impl Default for PrepareOptions {
    fn default() -> Self {
        Self {
            upscale: 1.0,
            normalize_height: None,
            padding: 10,
            shear: 0.0,
        }
    }
}

/// Prepares a captured region for OCR.
///
/// Output is binary with glyphs black (0) on white (255), whatever the
/// polarity of the source. A zero-area input yields a zero-area output;
/// anything else always yields an image.
pub fn prepare(raw: &RgbaImage, background: Background, options: &PrepareOptions) -> GrayImage {
    if raw.width() == 0 || raw.height() == 0 {
        return GrayImage::new(0, 0);
    }

    let mut gray = imageops::grayscale(raw);
    gray = upscale(&gray, options.upscale);

    let mut binary = binarize(&gray, background);
    if let Some(height) = options.normalize_height {
        binary = normalize_height(&binary, height, options.padding);
    }
    correct_shear(&binary, options.shear)
}

/// Otsu binarization. Text becomes black, background white.
pub fn binarize(gray: &GrayImage, background: Background) -> GrayImage {
    let level = otsu_level(gray);
    let mut output = GrayImage::new(gray.width(), gray.height());

    for (x, y, pixel) in gray.enumerate_pixels() {
        let bright = pixel[0] > level;
        let is_text = match background {
            Background::Light => !bright,
            Background::Dark => bright,
        };
        output.put_pixel(x, y, Luma([if is_text { 0 } else { 255 }]));
    }

    output
}

/// Upscales by `factor` with cubic interpolation. Factors <= 1.0 return a copy.
pub fn upscale(gray: &GrayImage, factor: f32) -> GrayImage {
    if factor <= 1.0 {
        return gray.clone();
    }
    let width = (gray.width() as f32 * factor).round() as u32;
    let height = (gray.height() as f32 * factor).round() as u32;
    imageops::resize(gray, width, height, FilterType::CatmullRom)
}

/// Resizes to `target_height` keeping the aspect ratio, then pads every side
/// with `padding` white pixels.
pub fn normalize_height(gray: &GrayImage, target_height: u32, padding: u32) -> GrayImage {
    if gray.height() == 0 || target_height == 0 {
        return gray.clone();
    }
    let scale = target_height as f32 / gray.height() as f32;
    let target_width = ((gray.width() as f32 * scale).round() as u32).max(1);
    let resized = imageops::resize(gray, target_width, target_height, FilterType::CatmullRom);

    let mut padded = GrayImage::from_pixel(
        target_width + padding * 2,
        target_height + padding * 2,
        Luma([255]),
    );
    imageops::overlay(&mut padded, &resized, padding as i64, padding as i64);
    padded
}

/// Undoes the horizontal slant of italic text.
pub fn correct_shear(gray: &GrayImage, shear: f32) -> GrayImage {
    if shear == 0.0 {
        return gray.clone();
    }
    #[rustfmt::skip]
    let matrix = [
        1.0, shear, 0.0,
        0.0, 1.0,   0.0,
        0.0, 0.0,   1.0,
    ];
    match Projection::from_matrix(matrix) {
        Some(projection) => warp(gray, &projection, Interpolation::Bilinear, Luma([255])),
        None => gray.clone(),
    }
}

/// Crops a sub-region using pixel coordinates, clamped to the image bounds.
pub fn crop_pixels(img: &RgbaImage, rect: &PixelRect) -> RgbaImage {
    let (w, h) = img.dimensions();

    let x0 = rect.left.min(w);
    let y0 = rect.top.min(h);
    let rw = rect.width.min(w - x0);
    let rh = rect.height.min(h - y0);

    imageops::crop_imm(img, x0, y0, rw, rh).to_image()
}

/// Crops the full-width horizontal band `top..bottom`.
pub fn crop_rows(img: &RgbaImage, top: u32, bottom: u32) -> RgbaImage {
    let height = bottom.saturating_sub(top);
    crop_pixels(img, &PixelRect::new(0, top, img.width(), height))
}

/// Stretches a mask to `width` x `height` (nearest neighbour).
pub fn fit_mask(mask: &GrayImage, width: u32, height: u32) -> GrayImage {
    if mask.dimensions() == (width, height) {
        mask.clone()
    } else if width == 0 || height == 0 {
        GrayImage::new(width, height)
    } else {
        imageops::resize(mask, width, height, FilterType::Nearest)
    }
}

/// Replaces every pixel outside the mask with white.
///
/// The mask is greyscale; white (>= 128) keeps the source pixel. A mask of a
/// different size is stretched to the image first.
pub fn apply_mask(img: &RgbaImage, mask: &GrayImage) -> RgbaImage {
    let mask = fit_mask(mask, img.width(), img.height());

    let mut output = img.clone();
    for (x, y, pixel) in output.enumerate_pixels_mut() {
        if mask.get_pixel(x, y)[0] < 128 {
            *pixel = Rgba([255, 255, 255, 255]);
        }
    }
    output
}

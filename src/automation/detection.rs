//! Pixel classification of UI elements.
//!
//! Page dots, step indicator boxes and empty ingredient slots are recognized
//! from colour statistics alone. None of this goes through OCR.

use image::{GrayImage, RgbaImage};

use crate::automation::config::{RecipeLayout, RgbColor};

/// Calculates the average brightness (luminance) of an image.
///
/// Uses the ITU-R BT.601 luma formula: Y = 0.299*R + 0.587*G + 0.114*B
/// Returns a value from 0.0 (black) to 255.0 (white).
pub fn calculate_brightness(img: &RgbaImage) -> f32 {
    if img.width() == 0 || img.height() == 0 {
        return 0.0;
    }

    let mut total: f64 = 0.0;
    let pixel_count = (img.width() * img.height()) as f64;

    for pixel in img.pixels() {
        let r = pixel[0] as f64;
        let g = pixel[1] as f64;
        let b = pixel[2] as f64;
        total += 0.299 * r + 0.587 * g + 0.114 * b;
    }

    (total / pixel_count) as f32
}

/// Mean colour of an image, `None` for an empty image.
pub fn mean_color(img: &RgbaImage) -> Option<RgbColor> {
    let count = (img.width() as u64) * (img.height() as u64);
    if count == 0 {
        return None;
    }

    let mut sums = [0u64; 3];
    for pixel in img.pixels() {
        sums[0] += pixel[0] as u64;
        sums[1] += pixel[1] as u64;
        sums[2] += pixel[2] as u64;
    }

    Some(RgbColor(
        (sums[0] / count) as u8,
        (sums[1] / count) as u8,
        (sums[2] / count) as u8,
    ))
}

/// HSV saturation of a colour (0.0-1.0).
pub fn saturation(color: RgbColor) -> f32 {
    let RgbColor(r, g, b) = color;
    let max = r.max(g).max(b) as f32;
    let min = r.min(g).min(b) as f32;
    if max == 0.0 { 0.0 } else { (max - min) / max }
}

/// Euclidean distance between two colours in RGB space.
pub fn color_distance(a: RgbColor, b: RgbColor) -> f32 {
    let dr = a.0 as f32 - b.0 as f32;
    let dg = a.1 as f32 - b.1 as f32;
    let db = a.2 as f32 - b.2 as f32;
    (dr * dr + dg * dg + db * db).sqrt()
}

/// Whether a page dot is lit.
pub fn is_page_indicator_active(dot: &RgbaImage, layout: &RecipeLayout) -> bool {
    calculate_brightness(dot) > layout.page_indicator_brightness
}

/// What a step line's indicator box shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepIndicator {
    /// Greyscale background: no step on this line
    Absent,
    /// Box colour matches this zero-based page
    Page(usize),
    /// Saturated box, but no page colour within tolerance
    Unclassified,
}

/// Classifies a step's indicator box.
///
/// A present box gets the page whose configured colour is nearest, if any is
/// within `color_tolerance`.
pub fn classify_step_indicator(indicator: &RgbaImage, layout: &RecipeLayout) -> StepIndicator {
    let Some(color) = mean_color(indicator) else {
        return StepIndicator::Absent;
    };
    if saturation(color) < layout.min_indicator_saturation {
        return StepIndicator::Absent;
    }

    layout
        .page_colors
        .iter()
        .enumerate()
        .map(|(page, &page_color)| (page, color_distance(color, page_color)))
        .filter(|&(_, distance)| distance <= layout.color_tolerance)
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map_or(StepIndicator::Unclassified, |(page, _)| StepIndicator::Page(page))
}

/// Standard deviation of greyscale intensity.
///
/// With a mask (same size as the image), only pixels where the mask is white
/// (>= 128) are counted.
pub fn intensity_std_dev(img: &GrayImage, mask: Option<&GrayImage>) -> f32 {
    let values: Vec<f64> = img
        .enumerate_pixels()
        .filter(|(x, y, _)| {
            mask.is_none_or(|m| m.get_pixel_checked(*x, *y).is_some_and(|p| p[0] >= 128))
        })
        .map(|(_, _, p)| p[0] as f64)
        .collect();
    if values.is_empty() {
        return 0.0;
    }

    let count = values.len() as f64;
    let mean = values.iter().sum::<f64>() / count;
    let variance = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / count;

    variance.sqrt() as f32
}

/// Whether an ingredient slot holds a label.
///
/// Unused slots are a flat fill; a label has text on a contrasting
/// background, so its intensity spread is well above zero. Masked-out
/// corners are ignored.
pub fn is_slot_active(slot: &GrayImage, mask: Option<&GrayImage>, min_contrast: f32) -> bool {
    intensity_std_dev(slot, mask) >= min_contrast
}

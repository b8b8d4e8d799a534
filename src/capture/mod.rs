//! Screen capture.
//!
//! This module provides:
//! - The [`ScreenCapture`] trait used by the recipe parser and slot locator
//! - [`ScreenshotCapture`], which serves regions of a saved full-screen image
//! - `GdiCapture` (Windows), which grabs regions of the live desktop

#[cfg(windows)]
pub mod gdi;

use anyhow::{anyhow, Context, Result};
use image::RgbaImage;
use std::path::Path;
use tracing::debug;

use crate::automation::config::{PixelRect, ScreenRect};
use crate::ocr::preprocess::crop_pixels;

#[cfg(windows)]
pub use gdi::GdiCapture;

/// Grabs an absolute screen region as an RGBA image.
pub trait ScreenCapture {
    fn capture(&self, region: &ScreenRect) -> Result<RgbaImage>;
}

/// Serves regions from one still image of the whole screen.
///
/// Used for dry runs and tests: every capture returns the same frame.
pub struct ScreenshotCapture {
    frame: RgbaImage,
}

impl ScreenshotCapture {
    pub fn new(frame: RgbaImage) -> Self {
        Self { frame }
    }

    pub fn open(path: &Path) -> Result<Self> {
        let frame = image::open(path)
            .with_context(|| format!("Failed to open screenshot {}", path.display()))?
            .to_rgba8();
        debug!(
            "Loaded screenshot {} ({}x{})",
            path.display(),
            frame.width(),
            frame.height()
        );
        Ok(Self::new(frame))
    }
}

impl ScreenCapture for ScreenshotCapture {
    fn capture(&self, region: &ScreenRect) -> Result<RgbaImage> {
        if region.left < 0 || region.top < 0 {
            return Err(anyhow!("Region {:?} starts off-screen", region));
        }
        let rect = PixelRect::new(
            region.left as u32,
            region.top as u32,
            region.width,
            region.height,
        );
        let img = crop_pixels(&self.frame, &rect);
        if img.width() == 0 || img.height() == 0 {
            return Err(anyhow!(
                "Region {:?} lies outside the {}x{} screenshot",
                region,
                self.frame.width(),
                self.frame.height()
            ));
        }
        Ok(img)
    }
}

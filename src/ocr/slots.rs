//! Ingredient slot reading.
//!
//! One capture of the ingredient panel per page view; every slot is cropped
//! from that single image. Slots that look empty are never sent to OCR.

use anyhow::{Context, Result};
use chrono::Local;
use image::{imageops, GrayImage, RgbaImage};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::automation::config::{BotSettings, PixelRect, ScreenRect};
use crate::automation::detection::is_slot_active;
use crate::capture::ScreenCapture;

use super::engine::TextRecognizer;
use super::extract::{normalize_label, TextExtractor};
use super::preprocess::{apply_mask, crop_pixels, fit_mask, prepare, Background, PrepareOptions};

/// Labels are resized to this height before OCR.
const LABEL_HEIGHT: u32 = 50;
const LABEL_PADDING: u32 = 10;

/// What was read from one ingredient slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlotReading {
    /// Index into the configured slots, and into `input_keys`
    pub position: usize,
    /// `None` when the slot is empty or OCR returned nothing
    pub label: Option<String>,
    /// Slot shows a label, decided from pixels alone
    pub active: bool,
}

impl SlotReading {
    pub fn is_recognized(&self) -> bool {
        self.label.is_some()
    }
}

/// Loads the slot corner mask (white = keep).
pub fn load_mask(path: &Path) -> Result<GrayImage> {
    let mask = image::open(path)
        .with_context(|| format!("Failed to load slot mask {}", path.display()))?
        .to_luma8();
    Ok(mask)
}

pub struct SlotLocator<'a> {
    extractor: TextExtractor<'a>,
    mask: Option<&'a GrayImage>,
    options: PrepareOptions,
    min_contrast: f32,
    /// Where crops of unreadable active slots are saved
    failed_slot_dir: Option<&'a Path>,
}

impl<'a> SlotLocator<'a> {
    pub fn new(
        recognizer: &'a dyn TextRecognizer,
        settings: &BotSettings,
        mask: Option<&'a GrayImage>,
        failed_slot_dir: Option<&'a Path>,
    ) -> Self {
        Self {
            extractor: TextExtractor::new(
                recognizer,
                settings.min_confidence,
                settings.horizontal_gap_threshold,
            ),
            mask,
            options: PrepareOptions {
                upscale: settings.ocr_upscale_factor,
                normalize_height: Some(LABEL_HEIGHT),
                padding: LABEL_PADDING,
                shear: settings.shear_factor,
            },
            min_contrast: settings.slot_min_contrast,
            failed_slot_dir,
        }
    }

    /// Captures the panel once and reads every slot from that image.
    pub fn locate_and_read(
        &self,
        capture: &dyn ScreenCapture,
        panel: &ScreenRect,
        slots: &[PixelRect],
    ) -> Result<Vec<SlotReading>> {
        let img = capture.capture(panel).context("Failed to capture ingredient panel")?;
        Ok(self.read_panel(&img, slots))
    }

    /// Reads slots from an already captured panel image.
    pub fn read_panel(&self, panel: &RgbaImage, slots: &[PixelRect]) -> Vec<SlotReading> {
        let readings: Vec<SlotReading> = slots
            .iter()
            .enumerate()
            .map(|(position, rect)| self.read_slot(position, &crop_pixels(panel, rect)))
            .collect();

        let labels: Vec<&str> = readings
            .iter()
            .map(|r| r.label.as_deref().unwrap_or("-"))
            .collect();
        debug!("Slots: [{}]", labels.join(", "));
        readings
    }

    fn read_slot(&self, position: usize, crop: &RgbaImage) -> SlotReading {
        if crop.width() == 0 || crop.height() == 0 {
            warn!("Slot {} lies outside the captured panel", position);
            return SlotReading {
                position,
                label: None,
                active: false,
            };
        }

        let mask = self.mask.map(|m| fit_mask(m, crop.width(), crop.height()));

        let gray = imageops::grayscale(crop);
        if !is_slot_active(&gray, mask.as_ref(), self.min_contrast) {
            return SlotReading {
                position,
                label: None,
                active: false,
            };
        }

        let masked = match &mask {
            Some(m) => apply_mask(crop, m),
            None => crop.clone(),
        };
        let prepared = prepare(&masked, Background::Light, &self.options);
        let text = normalize_label(&self.extractor.extract_phrase(&prepared));

        if text.is_empty() {
            match self.save_failed_slot(position, &masked) {
                Ok(Some(path)) => warn!(
                    "Slot {} looks active but OCR read nothing; saved {}",
                    position,
                    path.display()
                ),
                Ok(None) => warn!("Slot {} looks active but OCR read nothing", position),
                Err(e) => warn!(
                    "Slot {} looks active but OCR read nothing; could not save crop: {}",
                    position, e
                ),
            }
            return SlotReading {
                position,
                label: None,
                active: true,
            };
        }

        SlotReading {
            position,
            label: Some(text),
            active: true,
        }
    }

    fn save_failed_slot(&self, position: usize, img: &RgbaImage) -> Result<Option<PathBuf>> {
        let Some(dir) = self.failed_slot_dir else {
            return Ok(None);
        };
        std::fs::create_dir_all(dir)?;
        let timestamp = Local::now().format("%Y%m%d_%H%M%S_%3f");
        let path = dir.join(format!("slot{}_{}.png", position, timestamp));
        img.save(&path)?;
        Ok(Some(path))
    }
}

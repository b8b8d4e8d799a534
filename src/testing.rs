//! Fakes for the capture and OCR collaborators, shared by unit tests.

use anyhow::Result;
use image::{GrayImage, Rgba, RgbaImage};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

use crate::automation::config::{BotConfig, ScreenRect};
use crate::capture::{ScreenCapture, ScreenshotCapture};
use crate::ocr::engine::{OcrLine, OcrWord, PageSegMode, TextRecognizer};

/// Replies with queued texts in call order, then with nothing.
pub struct ScriptedRecognizer {
    replies: RefCell<VecDeque<String>>,
    pub calls: Cell<usize>,
}

impl ScriptedRecognizer {
    pub fn new(replies: &[&str]) -> Self {
        Self {
            replies: RefCell::new(replies.iter().map(|r| r.to_string()).collect()),
            calls: Cell::new(0),
        }
    }
}

impl TextRecognizer for ScriptedRecognizer {
    fn recognize(&self, _img: &GrayImage, _mode: PageSegMode) -> Result<Vec<OcrLine>> {
        self.calls.set(self.calls.get() + 1);
        let reply = self.replies.borrow_mut().pop_front().unwrap_or_default();
        // Words 10px apart: one phrase per reply
        let mut left = 0;
        let words: Vec<OcrWord> = reply
            .split_whitespace()
            .map(|w| {
                let width = w.len() as u32 * 10;
                let word = OcrWord {
                    text: w.to_string(),
                    confidence: 90.0,
                    left,
                    width,
                };
                left += width + 10;
                word
            })
            .collect();
        if words.is_empty() {
            Ok(Vec::new())
        } else {
            Ok(vec![OcrLine::from_words(words)])
        }
    }
}

/// Serves regions of a fixed frame and counts captures.
pub struct CountingCapture {
    inner: ScreenshotCapture,
    pub calls: Cell<usize>,
    pub regions: RefCell<Vec<ScreenRect>>,
}

impl CountingCapture {
    pub fn new(frame: RgbaImage) -> Self {
        Self {
            inner: ScreenshotCapture::new(frame),
            calls: Cell::new(0),
            regions: RefCell::new(Vec::new()),
        }
    }

    /// Captures of exactly `region`.
    pub fn count_of(&self, region: &ScreenRect) -> usize {
        self.regions.borrow().iter().filter(|r| *r == region).count()
    }
}

impl ScreenCapture for CountingCapture {
    fn capture(&self, region: &ScreenRect) -> Result<RgbaImage> {
        self.calls.set(self.calls.get() + 1);
        self.regions.borrow_mut().push(*region);
        self.inner.capture(region)
    }
}

/// Fills a rectangle of `frame` with a solid colour.
pub fn fill(frame: &mut RgbaImage, left: u32, top: u32, width: u32, height: u32, rgb: [u8; 3]) {
    for y in top..(top + height).min(frame.height()) {
        for x in left..(left + width).min(frame.width()) {
            frame.put_pixel(x, y, Rgba([rgb[0], rgb[1], rgb[2], 255]));
        }
    }
}

/// Paints a fake label: dark bar on a light card.
pub fn draw_label(frame: &mut RgbaImage, left: u32, top: u32, width: u32, height: u32) {
    fill(frame, left, top, width, height, [235, 235, 235]);
    fill(
        frame,
        left + width / 4,
        top + height / 3,
        width / 2,
        height / 3,
        [20, 20, 20],
    );
}

/// Full screen for one order: a page-1 step line, optionally lit page dots,
/// and labels in the given ingredient slots. Everything else is flat.
pub fn order_screen(config: &BotConfig, labelled_slots: &[usize], lit_dots: [bool; 2]) -> RgbaImage {
    let mut frame = RgbaImage::new(1920, 1080);
    fill(&mut frame, 0, 0, 1920, 1080, [30, 30, 30]);

    let recipe = config.regions.recipe_list;
    let (rx, ry) = (recipe.left as u32, recipe.top as u32);
    let layout = &config.recipe_layout;
    let indicator = layout.step_indicators[0];
    let c = layout.page_colors[0];
    fill(
        &mut frame,
        rx + indicator.left,
        ry + indicator.top,
        indicator.width,
        indicator.height,
        [c.0, c.1, c.2],
    );
    for (dot, lit) in layout.page_indicators.iter().zip(lit_dots) {
        if lit {
            fill(&mut frame, rx + dot.left, ry + dot.top, dot.width, dot.height, [250, 250, 250]);
        }
    }

    let panel = config.regions.ingredient_panel;
    for &position in labelled_slots {
        let slot = config.regions.ingredient_slots[position];
        draw_label(
            &mut frame,
            panel.left as u32 + slot.left,
            panel.top as u32 + slot.top,
            slot.width,
            slot.height,
        );
    }
    frame
}

//! Recipe list parsing.
//!
//! The recipe list shows up to ten step lines, each with a coloured indicator
//! box whose colour says which ingredient page the step belongs to, two page
//! dots for pages 2 and 3, and a freeform extra-instructions band below the
//! step lines.

use image::RgbaImage;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::automation::config::{BotSettings, MatchingConfig, RecipeLayout, ScreenRect};
use crate::automation::detection::{
    classify_step_indicator, is_page_indicator_active, StepIndicator,
};
use crate::automation::input::AbortSignal;
use crate::capture::ScreenCapture;
use crate::ocr::engine::TextRecognizer;
use crate::ocr::extract::TextExtractor;
use crate::ocr::preprocess::{crop_pixels, crop_rows, prepare, Background, PrepareOptions};

use super::steps::{RecipeStep, RecipeSteps, StepSyntax, PAGE_COUNT};

/// A recipe read from one capture of the recipe list.
#[derive(Clone, Debug)]
pub struct RecipeSnapshot {
    pub steps: RecipeSteps,
    /// Page 2 and page 3 indicators
    pub page_dots: [bool; 2],
}

/// Which of pages 2 and 3 exist, from the page dots. Pixel classification
/// only, no OCR.
pub fn detect_active_pages(recipe: &RgbaImage, layout: &RecipeLayout) -> [bool; 2] {
    layout
        .page_indicators
        .map(|rect| is_page_indicator_active(&crop_pixels(recipe, &rect), layout))
}

pub struct RecipeParser<'a> {
    layout: &'a RecipeLayout,
    syntax: &'a StepSyntax,
    extractor: TextExtractor<'a>,
    options: PrepareOptions,
    multi_step_char_threshold: usize,
}

impl<'a> RecipeParser<'a> {
    pub fn new(
        recognizer: &'a dyn TextRecognizer,
        syntax: &'a StepSyntax,
        layout: &'a RecipeLayout,
        settings: &BotSettings,
        matching: &MatchingConfig,
    ) -> Self {
        Self {
            layout,
            syntax,
            extractor: TextExtractor::new(
                recognizer,
                settings.min_confidence,
                settings.horizontal_gap_threshold,
            ),
            options: PrepareOptions {
                upscale: settings.ocr_upscale_factor,
                ..PrepareOptions::default()
            },
            multi_step_char_threshold: matching.multi_step_char_threshold,
        }
    }

    /// Reads all steps and the extra instructions from a recipe list image.
    ///
    /// Only step lines with an indicator box are sent to OCR; the box colour
    /// assigns the step to its page. A box of unknown colour goes to page 1.
    pub fn parse(&self, recipe: &RgbaImage) -> RecipeSteps {
        let mut pages: [Vec<RecipeStep>; PAGE_COUNT] = Default::default();

        for (line, (indicator, slot)) in self
            .layout
            .step_indicators
            .iter()
            .zip(&self.layout.step_slots)
            .enumerate()
        {
            let page = match classify_step_indicator(&crop_pixels(recipe, indicator), self.layout) {
                StepIndicator::Absent => continue,
                StepIndicator::Page(page) => page,
                StepIndicator::Unclassified => {
                    warn!(
                        "Step line {}: indicator colour matches no page; assigning it to page 1",
                        line + 1
                    );
                    0
                }
            };

            let prepared = prepare(&crop_pixels(recipe, slot), Background::Dark, &self.options);
            let text = self.extractor.extract_phrase(&prepared);
            if text.is_empty() {
                debug!("Step line {} has an indicator but no text", line + 1);
                continue;
            }
            debug!("Step line {} (page {}): '{}'", line + 1, page + 1, text);
            pages[page].extend(self.syntax.expand(&text, self.multi_step_char_threshold));
        }

        let extra = self.read_extra_steps(recipe);
        RecipeSteps::new(pages, extra)
    }

    /// OCRs the band between the second step line and the bottom of the
    /// panel. Phrases are joined with ", ".
    pub fn read_extra_steps(&self, recipe: &RgbaImage) -> String {
        let bounds = &self.layout.vertical_bounds;
        let band = crop_rows(recipe, bounds.line_two_bottom, bounds.panel_bottom);
        if band.height() == 0 {
            return String::new();
        }

        let prepared = prepare(&band, Background::Dark, &self.options);
        self.extractor.extract_phrase_list(&prepared).join(", ")
    }

    /// Captures and parses the recipe list until it shows at least one step.
    /// Text in the extra band alone does not count as a recipe.
    ///
    /// This is the idle state between orders, so it retries forever on
    /// `retry_delay`. Returns `None` only when `abort` fires.
    pub fn wait_for_recipe(
        &self,
        capture: &dyn ScreenCapture,
        region: &ScreenRect,
        abort: &dyn AbortSignal,
        retry_delay: Duration,
    ) -> Option<RecipeSnapshot> {
        let mut attempts: u64 = 0;
        loop {
            if abort.is_triggered() {
                warn!("Abort signal received while waiting for a recipe");
                return None;
            }
            attempts += 1;

            match capture.capture(region) {
                Ok(img) => {
                    let steps = self.parse(&img);
                    if !steps.is_empty() {
                        let page_dots = detect_active_pages(&img, self.layout);
                        info!(
                            "Recipe detected after {} attempt(s): {} (pages 2/3 active: {:?})",
                            attempts,
                            steps.summary(),
                            page_dots
                        );
                        return Some(RecipeSnapshot { steps, page_dots });
                    }
                    debug!("No recipe on screen yet (attempt {})", attempts);
                }
                Err(e) => warn!("Failed to capture recipe list: {:#}", e),
            }

            std::thread::sleep(retry_delay);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::input::NeverAbort;
    use crate::testing::{fill, CountingCapture, ScriptedRecognizer};
    use std::sync::atomic::AtomicBool;

    const REGION: ScreenRect = ScreenRect {
        left: 0,
        top: 0,
        width: 1100,
        height: 160,
    };

    fn paint_indicator(frame: &mut RgbaImage, layout: &RecipeLayout, line: usize, page: usize) {
        let rect = layout.step_indicators[line];
        let color = layout.page_colors[page];
        fill(frame, rect.left, rect.top, rect.width, rect.height, [color.0, color.1, color.2]);
    }

    fn blank_recipe() -> RgbaImage {
        let mut frame = RgbaImage::new(1100, 160);
        fill(&mut frame, 0, 0, 1100, 160, [30, 30, 30]);
        frame
    }

    struct Fixture {
        layout: RecipeLayout,
        settings: BotSettings,
        matching: MatchingConfig,
        syntax: StepSyntax,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                layout: RecipeLayout::default(),
                settings: BotSettings::default(),
                matching: MatchingConfig::default(),
                syntax: StepSyntax::new().unwrap(),
            }
        }

        fn parser<'a>(&'a self, recognizer: &'a ScriptedRecognizer) -> RecipeParser<'a> {
            RecipeParser::new(
                recognizer,
                &self.syntax,
                &self.layout,
                &self.settings,
                &self.matching,
            )
        }
    }

    #[test]
    fn test_parse_assigns_steps_by_indicator_colour() {
        let fx = Fixture::new();
        let mut frame = blank_recipe();
        paint_indicator(&mut frame, &fx.layout, 0, 0);
        paint_indicator(&mut frame, &fx.layout, 1, 1);
        paint_indicator(&mut frame, &fx.layout, 5, 0);

        let recognizer = ScriptedRecognizer::new(&["Oil", "Beef", "Rice", "Salt"]);
        let steps = fx.parser(&recognizer).parse(&frame);

        let page = |i: usize| -> Vec<String> {
            steps.page(i).iter().map(|s| s.action.clone()).collect()
        };
        assert_eq!(page(0), vec!["Oil", "Rice"]);
        assert_eq!(page(1), vec!["Beef"]);
        assert!(page(2).is_empty());
        assert_eq!(steps.extra(), "Salt");
        // Three step lines plus the extra band
        assert_eq!(recognizer.calls.get(), 4);
    }

    #[test]
    fn test_parse_unknown_indicator_colour_goes_to_first_page() {
        let fx = Fixture::new();
        let mut frame = blank_recipe();
        let rect = fx.layout.step_indicators[0];
        fill(&mut frame, rect.left, rect.top, rect.width, rect.height, [255, 255, 0]);

        let recognizer = ScriptedRecognizer::new(&["Shrimp"]);
        let steps = fx.parser(&recognizer).parse(&frame);
        assert_eq!(steps.page(0), &[RecipeStep::new("Shrimp")]);
        assert_eq!(steps.step_count(), 1);
    }

    #[test]
    fn test_parse_expands_long_steps() {
        let fx = Fixture::new();
        let mut frame = blank_recipe();
        paint_indicator(&mut frame, &fx.layout, 0, 2);

        let recognizer = ScriptedRecognizer::new(&["Lettuce and Tomato and Cheese"]);
        let steps = fx.parser(&recognizer).parse(&frame);
        let actions: Vec<_> = steps.page(2).iter().map(|s| s.action.as_str()).collect();
        assert_eq!(actions, vec!["Lettuce", "Tomato", "Cheese"]);
    }

    #[test]
    fn test_detect_active_pages() {
        let layout = RecipeLayout::default();
        let mut frame = blank_recipe();
        let dot = layout.page_indicators[0];
        fill(&mut frame, dot.left, dot.top, dot.width, dot.height, [250, 250, 250]);
        assert_eq!(detect_active_pages(&frame, &layout), [true, false]);
    }

    #[test]
    fn test_wait_for_recipe_retries_until_first_step() {
        let fx = Fixture::new();
        let mut frame = blank_recipe();
        paint_indicator(&mut frame, &fx.layout, 0, 0);
        let capture = CountingCapture::new(frame);

        // Attempt 1: step and extra band empty. Attempt 2: step found.
        let recognizer = ScriptedRecognizer::new(&["", "", "Oil"]);
        let snapshot = fx
            .parser(&recognizer)
            .wait_for_recipe(&capture, &REGION, &NeverAbort, Duration::ZERO)
            .unwrap();

        assert_eq!(snapshot.steps.page(0), &[RecipeStep::new("Oil")]);
        assert_eq!(snapshot.page_dots, [false, false]);
        assert_eq!(capture.calls.get(), 2);
        assert_eq!(recognizer.calls.get(), 4);
    }

    #[test]
    fn test_wait_for_recipe_ignores_extra_band_alone() {
        let fx = Fixture::new();
        let mut frame = blank_recipe();
        paint_indicator(&mut frame, &fx.layout, 0, 0);
        let capture = CountingCapture::new(frame);

        // Attempt 1: only the extra band reads. Attempt 2: step found.
        let recognizer = ScriptedRecognizer::new(&["", "Salt", "Oil", ""]);
        let snapshot = fx
            .parser(&recognizer)
            .wait_for_recipe(&capture, &REGION, &NeverAbort, Duration::ZERO)
            .unwrap();

        assert_eq!(capture.calls.get(), 2);
        assert_eq!(snapshot.steps.step_count(), 1);
        assert_eq!(snapshot.steps.extra(), "");
    }

    #[test]
    fn test_wait_for_recipe_returns_on_abort() {
        let fx = Fixture::new();
        let capture = CountingCapture::new(blank_recipe());
        let recognizer = ScriptedRecognizer::new(&[]);
        let abort = AtomicBool::new(true);

        let snapshot =
            fx.parser(&recognizer)
                .wait_for_recipe(&capture, &REGION, &abort, Duration::ZERO);
        assert!(snapshot.is_none());
        assert_eq!(capture.calls.get(), 0);
    }
}

//! Order state machine.
//!
//! One order runs: WaitingForRecipe → PageActive(0) → PageActive(n)* →
//! ExtraSteps → Serve → Idle. Each transition checks the abort signal; an
//! abort ends the current order only.

use anyhow::Result;
use chrono::{DateTime, Local};
use image::GrayImage;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::automation::config::{BotConfig, ExtraStepsPolicy};
use crate::automation::input::{
    press_sequence, AbortSignal, InputError, Key, KeyBindings, KeyEmitter,
};
use crate::capture::ScreenCapture;
use crate::ocr::engine::TextRecognizer;
use crate::ocr::slots::{load_mask, SlotLocator, SlotReading};
use crate::recipe::mapper::{map_steps_to_keys, MatchResult};
use crate::recipe::parser::RecipeParser;
use crate::recipe::steps::{PageState, RecipeSteps, StepSyntax, PAGE_COUNT};

/// Order state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderState {
    /// Polling the recipe list until a recipe shows up
    WaitingForRecipe,
    /// Entering keys for a zero-based ingredient page
    PageActive(usize),
    /// Entering the extra instructions
    ExtraSteps,
    /// Pressing the confirm key
    Serve,
    /// Order complete
    Idle,
    /// Abort signal received
    Aborted,
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderState::WaitingForRecipe => write!(f, "Waiting for recipe"),
            OrderState::PageActive(page) => write!(f, "Page {} active", page + 1),
            OrderState::ExtraSteps => write!(f, "Extra steps"),
            OrderState::Serve => write!(f, "Serving"),
            OrderState::Idle => write!(f, "Idle"),
            OrderState::Aborted => write!(f, "Aborted"),
        }
    }
}

/// How an order ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderOutcome {
    InProgress,
    Served,
    Aborted,
    Failed,
}

impl std::fmt::Display for OrderOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderOutcome::InProgress => write!(f, "in_progress"),
            OrderOutcome::Served => write!(f, "served"),
            OrderOutcome::Aborted => write!(f, "aborted"),
            OrderOutcome::Failed => write!(f, "failed"),
        }
    }
}

/// What happened during one order, for the log and the order CSV.
#[derive(Debug, Clone)]
pub struct OrderReport {
    pub started_at: DateTime<Local>,
    pub outcome: OrderOutcome,
    pub page_views: u8,
    pub recipe: String,
    /// Keys actually pressed, including page turns and confirm
    pub keys: Vec<Key>,
    pub matched: Vec<String>,
    pub unmatched: Vec<String>,
}

impl OrderReport {
    pub fn new() -> Self {
        Self {
            started_at: Local::now(),
            outcome: OrderOutcome::InProgress,
            page_views: 0,
            recipe: String::new(),
            keys: Vec::new(),
            matched: Vec::new(),
            unmatched: Vec::new(),
        }
    }
}

impl Default for OrderReport {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only state shared by every order of a run.
pub struct SessionResources {
    pub config: BotConfig,
    pub bindings: KeyBindings,
    pub syntax: StepSyntax,
    pub mask: Option<GrayImage>,
    pub failed_slot_dir: Option<PathBuf>,
}

impl SessionResources {
    /// Parses key bindings and loads the slot mask. A configured mask that
    /// is missing on disk is a warning; slots are then read unmasked.
    pub fn new(config: BotConfig, failed_slot_dir: Option<PathBuf>) -> Result<Self> {
        let bindings = KeyBindings::from_controls(&config.controls)?;
        let mask = match &config.bot_settings.ingredient_mask_path {
            Some(path) => {
                let path = crate::paths::resolve_asset_path(path);
                match load_mask(&path) {
                    Ok(mask) => {
                        debug!("Loaded slot mask {}", path.display());
                        Some(mask)
                    }
                    Err(e) => {
                        warn!("{:#}; reading slots without a mask", e);
                        None
                    }
                }
            }
            None => None,
        };
        let syntax = StepSyntax::new()?.with_max_count(config.matching.max_step_count);
        Ok(Self {
            config,
            bindings,
            syntax,
            mask,
            failed_slot_dir,
        })
    }
}

/// External collaborators for one order.
pub struct Collaborators<'a> {
    pub capture: &'a dyn ScreenCapture,
    pub recognizer: &'a dyn TextRecognizer,
    pub emitter: &'a mut dyn KeyEmitter,
    pub abort: &'a dyn AbortSignal,
}

/// State of one order from recipe detection to serve.
pub struct OrderContext<'a> {
    pub state: OrderState,
    pub report: OrderReport,
    resources: &'a SessionResources,
    parser: RecipeParser<'a>,
    locator: SlotLocator<'a>,
    capture: &'a dyn ScreenCapture,
    emitter: &'a mut dyn KeyEmitter,
    abort: &'a dyn AbortSignal,
    recipe: RecipeSteps,
    pages: PageState,
    /// Slots of the page currently on screen
    last_slots: Vec<SlotReading>,
}

impl<'a> OrderContext<'a> {
    pub fn new(resources: &'a SessionResources, io: Collaborators<'a>) -> Self {
        let config = &resources.config;
        Self {
            state: OrderState::WaitingForRecipe,
            report: OrderReport::new(),
            resources,
            parser: RecipeParser::new(
                io.recognizer,
                &resources.syntax,
                &config.recipe_layout,
                &config.bot_settings,
                &config.matching,
            ),
            locator: SlotLocator::new(
                io.recognizer,
                &config.bot_settings,
                resources.mask.as_ref(),
                resources.failed_slot_dir.as_deref(),
            ),
            capture: io.capture,
            emitter: io.emitter,
            abort: io.abort,
            recipe: RecipeSteps::default(),
            pages: PageState::new([false, false], 0),
            last_slots: Vec::new(),
        }
    }

    fn delay(ms: u64) {
        if ms > 0 {
            std::thread::sleep(Duration::from_millis(ms));
        }
    }

    /// Presses `keys`, recording the ones that went out.
    fn emit(&mut self, keys: &[Key]) -> Result<(), InputError> {
        let key_delay = Duration::from_millis(self.resources.config.bot_settings.key_delay_ms);
        let result = press_sequence(&mut *self.emitter, self.abort, keys, key_delay);
        let pressed = match &result {
            Ok(()) => keys.len(),
            Err(InputError::Aborted { pressed, .. }) => *pressed,
            Err(_) => 0,
        };
        self.report.keys.extend_from_slice(&keys[..pressed]);
        result
    }

    fn record(&mut self, result: MatchResult) {
        self.report.matched.extend(result.matched);
        self.report.unmatched.extend(result.unmatched);
    }

    /// Keeps the steps of pages after `last_viewed` as unmatched.
    fn record_unvisited(&mut self, last_viewed: usize) {
        for page in (last_viewed + 1)..PAGE_COUNT {
            let texts: Vec<String> = self.recipe.page(page).iter().map(|s| s.text.clone()).collect();
            if texts.is_empty() {
                continue;
            }
            warn!(
                "Page {} was not visited; steps left undone: {}",
                page + 1,
                texts.join(", ")
            );
            self.report.unmatched.extend(texts);
        }
    }

    /// Advances the state machine by one step.
    ///
    /// Returns `Ok(true)` if the order continues, `Ok(false)` once it is
    /// served or aborted.
    pub fn step(&mut self) -> Result<bool> {
        if self.abort.is_triggered() && !matches!(self.state, OrderState::Idle | OrderState::Aborted) {
            warn!("Abort requested during '{}', stopping order", self.state);
            self.state = OrderState::Aborted;
            self.report.outcome = OrderOutcome::Aborted;
            return Ok(false);
        }

        let resources = self.resources;
        let config = &resources.config;
        let settings = &config.bot_settings;

        match self.state {
            OrderState::WaitingForRecipe => {
                let snapshot = self.parser.wait_for_recipe(
                    self.capture,
                    &config.regions.recipe_list,
                    self.abort,
                    Duration::from_millis(settings.retry_delay_ms),
                );
                let Some(snapshot) = snapshot else {
                    self.state = OrderState::Aborted;
                    self.report.outcome = OrderOutcome::Aborted;
                    return Ok(false);
                };

                self.report.started_at = Local::now();
                self.report.recipe = snapshot.steps.summary();
                self.pages = PageState::new(snapshot.page_dots, config.page_turn_budget());
                self.recipe = snapshot.steps;
                self.state = OrderState::PageActive(0);
                Ok(true)
            }

            OrderState::PageActive(page) => {
                self.report.page_views += 1;

                self.last_slots = match self.locator.locate_and_read(
                    self.capture,
                    &config.regions.ingredient_panel,
                    &config.regions.ingredient_slots,
                ) {
                    Ok(slots) => slots,
                    Err(e) => {
                        warn!("Page {}: {:#}; no keys entered for this page", page + 1, e);
                        Vec::new()
                    }
                };

                let result = map_steps_to_keys(
                    self.recipe.page(page),
                    &self.last_slots,
                    &resources.bindings.input_keys,
                    &config.matching,
                );
                log_match(&format!("Page {}", page + 1), &result);

                let keys = result.keys.clone();
                self.record(result);
                self.emit(&keys)?;

                match self.pages.next_page() {
                    Some(next) if self.pages.turns_left() > 0 => {
                        info!("Turning to page {}", next + 1);
                        self.emit(&[resources.bindings.page_turn])?;
                        self.pages.turn();
                        Self::delay(settings.page_turn_delay_ms);
                        self.state = OrderState::PageActive(next);
                    }
                    Some(next) => {
                        info!(
                            "Page-turn budget exhausted; page {} is lit but will not be visited",
                            next + 1
                        );
                        self.record_unvisited(page);
                        self.state = OrderState::ExtraSteps;
                    }
                    None => {
                        self.record_unvisited(page);
                        self.state = OrderState::ExtraSteps;
                    }
                }
                Ok(true)
            }

            OrderState::ExtraSteps => {
                let extra = self.recipe.extra().trim();
                if extra.is_empty() {
                    self.state = OrderState::Serve;
                    return Ok(true);
                }

                match config.recipe_layout.extra_steps_policy {
                    ExtraStepsPolicy::Ignore => {
                        info!("Ignoring extra steps: '{}'", extra);
                    }
                    ExtraStepsPolicy::LastActivePage => {
                        let steps = resources.syntax.extra_steps(extra);
                        let result = map_steps_to_keys(
                            &steps,
                            &self.last_slots,
                            &resources.bindings.input_keys,
                            &config.matching,
                        );
                        log_match("Extra steps", &result);

                        let keys = result.keys.clone();
                        self.record(result);
                        self.emit(&keys)?;
                    }
                }
                self.state = OrderState::Serve;
                Ok(true)
            }

            OrderState::Serve => {
                self.emit(&[resources.bindings.confirm])?;
                info!(
                    "Order served after {} page view(s), {} key(s) pressed",
                    self.report.page_views,
                    self.report.keys.len()
                );
                Self::delay(settings.post_serve_delay_ms);
                self.state = OrderState::Idle;
                self.report.outcome = OrderOutcome::Served;
                Ok(true)
            }

            OrderState::Idle | OrderState::Aborted => Ok(false),
        }
    }

    /// Runs the order to completion.
    ///
    /// An abort during key emission ends the order with
    /// [`OrderOutcome::Aborted`]; any other error is returned.
    pub fn run(&mut self) -> Result<()> {
        loop {
            match self.step() {
                Ok(true) => {}
                Ok(false) => return Ok(()),
                Err(e) => {
                    if let Some(InputError::Aborted { pressed, total }) = e.downcast_ref::<InputError>() {
                        warn!(
                            "Order aborted during key emission ({} of {} keys pressed)",
                            pressed, total
                        );
                        self.state = OrderState::Aborted;
                        self.report.outcome = OrderOutcome::Aborted;
                        return Ok(());
                    }
                    self.report.outcome = OrderOutcome::Failed;
                    return Err(e);
                }
            }
        }
    }
}

fn log_match(what: &str, result: &MatchResult) {
    let keys: Vec<String> = result.keys.iter().map(|k| k.to_string()).collect();
    info!("{}: matched {:?}, keys [{}]", what, result.matched, keys.join(" "));
    if !result.unmatched.is_empty() {
        warn!("{}: unmatched steps {:?}", what, result.unmatched);
    }
    if result.is_empty() {
        info!("{}: nothing to enter", what);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::config::ScreenRect;
    use crate::automation::input::{DryRunEmitter, NeverAbort};
    use crate::testing::{order_screen as screen, CountingCapture, ScriptedRecognizer};
    use image::RgbaImage;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn test_config() -> BotConfig {
        let mut config = BotConfig::default();
        let settings = &mut config.bot_settings;
        settings.ingredient_mask_path = None;
        settings.retry_delay_ms = 0;
        settings.key_delay_ms = 0;
        settings.page_turn_delay_ms = 0;
        settings.post_serve_delay_ms = 0;
        config
    }

    fn resources(config: BotConfig) -> SessionResources {
        SessionResources::new(config, None).unwrap()
    }

    /// Sets the shared flag on its first press.
    struct TripwireEmitter<'f> {
        pressed: Vec<Key>,
        flag: &'f AtomicBool,
    }

    impl KeyEmitter for TripwireEmitter<'_> {
        fn press(&mut self, key: Key) -> Result<(), InputError> {
            self.pressed.push(key);
            self.flag.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn panel_region(config: &BotConfig) -> ScreenRect {
        config.regions.ingredient_panel
    }

    #[test]
    fn test_state_display() {
        assert_eq!(format!("{}", OrderState::WaitingForRecipe), "Waiting for recipe");
        assert_eq!(format!("{}", OrderState::PageActive(1)), "Page 2 active");
        assert_eq!(OrderOutcome::Served.to_string(), "served");
    }

    #[test]
    fn test_single_page_order() {
        let res = resources(test_config());
        let capture = CountingCapture::new(screen(&res.config, &[0, 1], [false, false]));
        // Step line, extra band, then slots 0 and 1
        let recognizer = ScriptedRecognizer::new(&["Oil", "", "Beef", "Oil"]);
        let mut emitter = DryRunEmitter::default();

        let mut ctx = OrderContext::new(
            &res,
            Collaborators {
                capture: &capture,
                recognizer: &recognizer,
                emitter: &mut emitter,
                abort: &NeverAbort,
            },
        );
        ctx.run().unwrap();

        assert_eq!(ctx.state, OrderState::Idle);
        assert_eq!(ctx.report.outcome, OrderOutcome::Served);
        assert_eq!(ctx.report.page_views, 1);
        assert_eq!(ctx.report.matched, vec!["Oil"]);
        assert_eq!(ctx.report.keys, vec![Key::Letter('S'), Key::Enter]);
        drop(ctx);
        assert_eq!(emitter.pressed, vec![Key::Letter('S'), Key::Enter]);
    }

    #[test]
    fn test_never_more_than_three_page_views() {
        let mut config = test_config();
        config.bot_settings.max_page_turns = 50;
        let res = resources(config);
        let capture = CountingCapture::new(screen(&res.config, &[], [true, true]));
        let recognizer = ScriptedRecognizer::new(&["Oil"]);
        let mut emitter = DryRunEmitter::default();

        let mut ctx = OrderContext::new(
            &res,
            Collaborators {
                capture: &capture,
                recognizer: &recognizer,
                emitter: &mut emitter,
                abort: &NeverAbort,
            },
        );
        ctx.run().unwrap();

        assert_eq!(ctx.report.page_views, 3);
        assert_eq!(ctx.report.unmatched, vec!["Oil"]);
        // One panel capture per page view
        assert_eq!(capture.count_of(&panel_region(&res.config)), 3);
        drop(ctx);
        assert_eq!(emitter.pressed, vec![Key::Right, Key::Right, Key::Enter]);
    }

    #[test]
    fn test_page_turn_budget_from_config() {
        let mut config = test_config();
        config.bot_settings.max_page_turns = 1;
        let res = resources(config);
        let capture = CountingCapture::new(screen(&res.config, &[], [true, true]));
        let recognizer = ScriptedRecognizer::new(&["Oil"]);
        let mut emitter = DryRunEmitter::default();

        let mut ctx = OrderContext::new(
            &res,
            Collaborators {
                capture: &capture,
                recognizer: &recognizer,
                emitter: &mut emitter,
                abort: &NeverAbort,
            },
        );
        ctx.run().unwrap();

        assert_eq!(ctx.report.page_views, 2);
        assert_eq!(ctx.report.outcome, OrderOutcome::Served);
    }

    /// Order screen whose second step line belongs to page 2.
    fn screen_with_page_two_step(config: &BotConfig, lit_dots: [bool; 2]) -> RgbaImage {
        let mut frame = screen(config, &[0], lit_dots);
        let recipe = config.regions.recipe_list;
        let indicator = config.recipe_layout.step_indicators[1];
        let c = config.recipe_layout.page_colors[1];
        crate::testing::fill(
            &mut frame,
            recipe.left as u32 + indicator.left,
            recipe.top as u32 + indicator.top,
            indicator.width,
            indicator.height,
            [c.0, c.1, c.2],
        );
        frame
    }

    #[test]
    fn test_steps_on_unvisited_pages_are_unmatched() {
        // Page 2 unlit, then page 2 lit with no turns allowed
        for (lit_dots, max_turns) in [([false, false], 2), ([true, false], 0)] {
            let mut config = test_config();
            config.bot_settings.max_page_turns = max_turns;
            let res = resources(config);
            let capture = CountingCapture::new(screen_with_page_two_step(&res.config, lit_dots));
            // Step lines 1 and 2, extra band, slot 0
            let recognizer = ScriptedRecognizer::new(&["Oil", "Shrimp", "", "Oil"]);
            let mut emitter = DryRunEmitter::default();

            let mut ctx = OrderContext::new(
                &res,
                Collaborators {
                    capture: &capture,
                    recognizer: &recognizer,
                    emitter: &mut emitter,
                    abort: &NeverAbort,
                },
            );
            ctx.run().unwrap();

            assert_eq!(ctx.report.recipe, "p1: Oil; p2: Shrimp");
            assert_eq!(ctx.report.page_views, 1);
            assert_eq!(ctx.report.matched, vec!["Oil"]);
            assert_eq!(ctx.report.unmatched, vec!["Shrimp"]);
            assert_eq!(ctx.report.keys, vec![Key::Letter('A'), Key::Enter]);
        }
    }

    #[test]
    fn test_extra_steps_use_last_page_slots() {
        let res = resources(test_config());
        let capture = CountingCapture::new(screen(&res.config, &[0, 1], [false, false]));
        // Step line, extra band, slots 0 and 1
        let recognizer = ScriptedRecognizer::new(&["Oil", "Salt", "Salt", "Oil"]);
        let mut emitter = DryRunEmitter::default();

        let mut ctx = OrderContext::new(
            &res,
            Collaborators {
                capture: &capture,
                recognizer: &recognizer,
                emitter: &mut emitter,
                abort: &NeverAbort,
            },
        );
        ctx.run().unwrap();

        assert_eq!(
            ctx.report.keys,
            vec![Key::Letter('S'), Key::Letter('A'), Key::Enter]
        );
        assert_eq!(ctx.report.matched, vec!["Oil", "Salt"]);
        // The panel is captured once; extra steps reuse that reading
        assert_eq!(capture.count_of(&panel_region(&res.config)), 1);
    }

    #[test]
    fn test_extra_steps_ignored_by_policy() {
        let mut config = test_config();
        config.recipe_layout.extra_steps_policy = ExtraStepsPolicy::Ignore;
        let res = resources(config);
        let capture = CountingCapture::new(screen(&res.config, &[0, 1], [false, false]));
        let recognizer = ScriptedRecognizer::new(&["Oil", "Salt", "Salt", "Oil"]);
        let mut emitter = DryRunEmitter::default();

        let mut ctx = OrderContext::new(
            &res,
            Collaborators {
                capture: &capture,
                recognizer: &recognizer,
                emitter: &mut emitter,
                abort: &NeverAbort,
            },
        );
        ctx.run().unwrap();

        assert_eq!(ctx.report.keys, vec![Key::Letter('S'), Key::Enter]);
    }

    #[test]
    fn test_abort_stops_before_next_key() {
        let res = resources(test_config());
        let capture = CountingCapture::new(screen(&res.config, &[0, 1], [false, false]));
        // "Oil (2)" presses S twice; the abort lands between the two
        let recognizer = ScriptedRecognizer::new(&["Oil (2)", "", "Beef", "Oil"]);
        let flag = AtomicBool::new(false);
        let mut emitter = TripwireEmitter {
            pressed: Vec::new(),
            flag: &flag,
        };

        let mut ctx = OrderContext::new(
            &res,
            Collaborators {
                capture: &capture,
                recognizer: &recognizer,
                emitter: &mut emitter,
                abort: &flag,
            },
        );
        ctx.run().unwrap();

        assert_eq!(ctx.state, OrderState::Aborted);
        assert_eq!(ctx.report.outcome, OrderOutcome::Aborted);
        assert_eq!(ctx.report.keys.len(), 1);
        drop(ctx);
        assert_eq!(emitter.pressed.len(), 1, "no key after the abort");
    }

    #[test]
    fn test_abort_while_waiting_for_recipe() {
        let res = resources(test_config());
        let capture = CountingCapture::new(RgbaImage::new(1920, 1080));
        let recognizer = ScriptedRecognizer::new(&[]);
        let mut emitter = DryRunEmitter::default();
        let flag = AtomicBool::new(true);

        let mut ctx = OrderContext::new(
            &res,
            Collaborators {
                capture: &capture,
                recognizer: &recognizer,
                emitter: &mut emitter,
                abort: &flag,
            },
        );
        ctx.run().unwrap();

        assert_eq!(ctx.state, OrderState::Aborted);
        assert_eq!(capture.calls.get(), 0);
    }
}

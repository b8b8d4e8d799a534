//! Configuration types for the bot.
//!
//! Loads calibration geometry, key bindings and timing from config.json.
//! The loaded [`BotConfig`] is immutable and passed by reference to every
//! component that needs it.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::automation::input::Key;

/// Hard cap on page turns per order (three page views in total).
pub const MAX_PAGE_TURNS: u8 = 2;

/// An absolute rectangle in screen pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenRect {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
}

/// A rectangle in pixels relative to the top-left of a captured region.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelRect {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub const fn new(left: u32, top: u32, width: u32, height: u32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }
}

/// An RGB colour sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RgbColor(pub u8, pub u8, pub u8);

/// Vertical bounds of the recipe list, relative to the recipe region.
///
/// Normal steps sit on two slot lines; anything between `line_two_bottom`
/// and `panel_bottom` is freeform extra instructions.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct VerticalBounds {
    pub panel_top: u32,
    pub line_one_bottom: u32,
    pub line_two_bottom: u32,
    pub panel_bottom: u32,
}

impl Default for VerticalBounds {
    fn default() -> Self {
        Self {
            panel_top: 10,
            line_one_bottom: 50,
            line_two_bottom: 95,
            panel_bottom: 150,
        }
    }
}

/// Which page the extra instructions are applied on.
///
/// Extra steps are not bound to a slot on any particular page. The default
/// applies them against the last page viewed, which is wrong for recipes
/// whose extra steps belong to an earlier page.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtraStepsPolicy {
    #[default]
    LastActivePage,
    Ignore,
}

/// Screen regions captured each page view.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegionsConfig {
    /// The recipe list (steps, page dots, extra instructions)
    pub recipe_list: ScreenRect,
    /// The ingredient grid of the visible page
    pub ingredient_panel: ScreenRect,
    /// Ingredient slots relative to the panel, in input-key order
    pub ingredient_slots: Vec<PixelRect>,
}

impl Default for RegionsConfig {
    fn default() -> Self {
        // Two columns of four, column-major like the key layout A S D F / Z X C V
        let mut ingredient_slots = Vec::with_capacity(8);
        for column in 0..2u32 {
            for row in 0..4u32 {
                ingredient_slots.push(PixelRect::new(10 + column * 300, 10 + row * 70, 280, 56));
            }
        }
        Self {
            recipe_list: ScreenRect {
                left: 40,
                top: 80,
                width: 1100,
                height: 160,
            },
            ingredient_panel: ScreenRect {
                left: 1260,
                top: 620,
                width: 610,
                height: 300,
            },
            ingredient_slots,
        }
    }
}

/// Geometry of the recipe list.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecipeLayout {
    /// Text area of each step line, in reading order
    pub step_slots: Vec<PixelRect>,
    /// Coloured box to the left of each step line (same order as `step_slots`)
    pub step_indicators: Vec<PixelRect>,
    /// Page 2 and page 3 dots
    pub page_indicators: [PixelRect; 2],
    #[serde(default)]
    pub vertical_bounds: VerticalBounds,
    /// Indicator box colour per page (page 1, 2, 3)
    #[serde(default = "default_page_colors")]
    pub page_colors: [RgbColor; 3],
    /// Maximum RGB distance between an indicator and its page colour
    #[serde(default = "default_color_tolerance")]
    pub color_tolerance: f32,
    /// Minimum mean saturation (0.0-1.0) for a step indicator to count as present
    #[serde(default = "default_min_indicator_saturation")]
    pub min_indicator_saturation: f32,
    /// Page dot brightness above this = page exists
    #[serde(default = "default_page_indicator_brightness")]
    pub page_indicator_brightness: f32,
    #[serde(default)]
    pub extra_steps_policy: ExtraStepsPolicy,
}

fn default_page_colors() -> [RgbColor; 3] {
    [
        RgbColor(76, 175, 80),
        RgbColor(33, 150, 243),
        RgbColor(244, 67, 54),
    ]
}

fn default_color_tolerance() -> f32 {
    80.0
}

fn default_min_indicator_saturation() -> f32 {
    0.2
}

fn default_page_indicator_brightness() -> f32 {
    120.0
}

impl Default for RecipeLayout {
    fn default() -> Self {
        // Ten step slots: two lines of five
        let mut step_slots = Vec::with_capacity(10);
        let mut step_indicators = Vec::with_capacity(10);
        for line in 0..2u32 {
            for column in 0..5u32 {
                let left = 10 + column * 215;
                let top = 12 + line * 42;
                step_indicators.push(PixelRect::new(left, top, 30, 36));
                step_slots.push(PixelRect::new(left + 30, top, 180, 38));
            }
        }
        Self {
            step_slots,
            step_indicators,
            page_indicators: [PixelRect::new(1040, 4, 12, 12), PixelRect::new(1060, 4, 12, 12)],
            vertical_bounds: VerticalBounds::default(),
            page_colors: default_page_colors(),
            color_tolerance: default_color_tolerance(),
            min_indicator_saturation: default_min_indicator_saturation(),
            page_indicator_brightness: default_page_indicator_brightness(),
            extra_steps_policy: ExtraStepsPolicy::default(),
        }
    }
}

/// Key bindings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ControlsConfig {
    /// One key per ingredient slot position
    pub input_keys: Vec<String>,
    pub page_turn_key: String,
    pub confirm_key: String,
}

impl Default for ControlsConfig {
    fn default() -> Self {
        Self {
            input_keys: ["A", "S", "D", "F", "Z", "X", "C", "V"]
                .iter()
                .map(|k| k.to_string())
                .collect(),
            page_turn_key: "Right".to_string(),
            confirm_key: "Enter".to_string(),
        }
    }
}

/// OCR, timing and safety settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BotSettings {
    /// Explicit tesseract executable; discovered automatically when absent
    #[serde(default)]
    pub tesseract_path: Option<String>,
    /// Greyscale mask for the rounded slot corners (white = keep)
    #[serde(default)]
    pub ingredient_mask_path: Option<String>,
    /// Words below this Tesseract confidence are dropped
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
    #[serde(default = "default_upscale")]
    pub ocr_upscale_factor: f32,
    /// Horizontal shear applied to slot labels (italic text)
    #[serde(default = "default_shear_factor")]
    pub shear_factor: f32,
    /// Word gap (px) above which two words on a line are separate phrases
    #[serde(default = "default_gap_threshold")]
    pub horizontal_gap_threshold: u32,
    /// Minimum intensity standard deviation for a slot to count as active
    #[serde(default = "default_slot_min_contrast")]
    pub slot_min_contrast: f32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_key_delay_ms")]
    pub key_delay_ms: u64,
    #[serde(default = "default_page_turn_delay_ms")]
    pub page_turn_delay_ms: u64,
    /// Pause after serving so the finished order leaves the screen
    #[serde(default = "default_post_serve_delay_ms")]
    pub post_serve_delay_ms: u64,
    #[serde(default = "default_max_page_turns")]
    pub max_page_turns: u8,
    #[serde(default = "default_true")]
    pub enable_failsafe: bool,
    /// Cursor within this many pixels of the top-left corner aborts
    #[serde(default = "default_failsafe_margin")]
    pub failsafe_margin: i32,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_min_confidence() -> f32 {
    50.0
}

fn default_upscale() -> f32 {
    1.0
}

fn default_shear_factor() -> f32 {
    0.14
}

fn default_gap_threshold() -> u32 {
    30
}

fn default_slot_min_contrast() -> f32 {
    12.0
}

fn default_retry_delay_ms() -> u64 {
    500
}

fn default_key_delay_ms() -> u64 {
    40
}

fn default_page_turn_delay_ms() -> u64 {
    250
}

fn default_post_serve_delay_ms() -> u64 {
    1500
}

fn default_max_page_turns() -> u8 {
    MAX_PAGE_TURNS
}

fn default_true() -> bool {
    true
}

fn default_failsafe_margin() -> i32 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for BotSettings {
    fn default() -> Self {
        Self {
            tesseract_path: None,
            ingredient_mask_path: Some("assets/masks/ingredient_mask.png".to_string()),
            min_confidence: default_min_confidence(),
            ocr_upscale_factor: default_upscale(),
            shear_factor: default_shear_factor(),
            horizontal_gap_threshold: default_gap_threshold(),
            slot_min_contrast: default_slot_min_contrast(),
            retry_delay_ms: default_retry_delay_ms(),
            key_delay_ms: default_key_delay_ms(),
            page_turn_delay_ms: default_page_turn_delay_ms(),
            post_serve_delay_ms: default_post_serve_delay_ms(),
            max_page_turns: default_max_page_turns(),
            enable_failsafe: true,
            failsafe_margin: default_failsafe_margin(),
            log_level: default_log_level(),
        }
    }
}

/// Step-to-label matching settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MatchingConfig {
    /// Normalized similarity (0.0-1.0) required for a fuzzy match.
    /// `None` keeps matching exact.
    #[serde(default)]
    pub fuzzy_threshold: Option<f32>,
    /// Steps longer than this with separators are split into sub-steps
    #[serde(default = "default_multi_step_char_threshold")]
    pub multi_step_char_threshold: usize,
    /// Largest repeat count a step may ask for; larger counts are clamped
    #[serde(default = "default_max_step_count")]
    pub max_step_count: u32,
}

fn default_multi_step_char_threshold() -> usize {
    20
}

fn default_max_step_count() -> u32 {
    crate::recipe::steps::DEFAULT_MAX_COUNT
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            fuzzy_threshold: None,
            multi_step_char_threshold: default_multi_step_char_threshold(),
            max_step_count: default_max_step_count(),
        }
    }
}

/// Complete bot configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BotConfig {
    #[serde(default)]
    pub regions: RegionsConfig,
    #[serde(default)]
    pub recipe_layout: RecipeLayout,
    #[serde(default)]
    pub controls: ControlsConfig,
    #[serde(default)]
    pub bot_settings: BotSettings,
    #[serde(default)]
    pub matching: MatchingConfig,
}

impl BotConfig {
    /// Checks the invariants the rest of the bot relies on.
    pub fn validate(&self) -> Result<()> {
        for name in self
            .controls
            .input_keys
            .iter()
            .chain([&self.controls.page_turn_key, &self.controls.confirm_key])
        {
            Key::from_name(name).with_context(|| format!("Invalid key binding '{}'", name))?;
        }

        if self.regions.ingredient_slots.len() > self.controls.input_keys.len() {
            return Err(anyhow!(
                "{} ingredient slots configured but only {} input keys",
                self.regions.ingredient_slots.len(),
                self.controls.input_keys.len()
            ));
        }

        let panel = &self.regions.ingredient_panel;
        for (position, slot) in self.regions.ingredient_slots.iter().enumerate() {
            if slot.left.saturating_add(slot.width) > panel.width
                || slot.top.saturating_add(slot.height) > panel.height
            {
                return Err(anyhow!(
                    "ingredient slot {} ({}x{} at {},{}) lies outside the {}x{} ingredient panel",
                    position,
                    slot.width,
                    slot.height,
                    slot.left,
                    slot.top,
                    panel.width,
                    panel.height
                ));
            }
        }

        let layout = &self.recipe_layout;
        if layout.step_slots.len() != layout.step_indicators.len() {
            return Err(anyhow!(
                "recipe_layout has {} step slots but {} step indicators",
                layout.step_slots.len(),
                layout.step_indicators.len()
            ));
        }

        let bounds = &layout.vertical_bounds;
        if bounds.line_two_bottom > bounds.panel_bottom {
            return Err(anyhow!(
                "vertical_bounds.line_two_bottom ({}) is below panel_bottom ({})",
                bounds.line_two_bottom,
                bounds.panel_bottom
            ));
        }

        if let Some(threshold) = self.matching.fuzzy_threshold {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(anyhow!(
                    "matching.fuzzy_threshold must be within 0.0-1.0, got {}",
                    threshold
                ));
            }
        }

        if self.matching.max_step_count == 0 {
            return Err(anyhow!("matching.max_step_count must be at least 1"));
        }

        Ok(())
    }

    /// Page turns allowed per order, never more than [`MAX_PAGE_TURNS`].
    pub fn page_turn_budget(&self) -> u8 {
        self.bot_settings.max_page_turns.min(MAX_PAGE_TURNS)
    }
}

/// Where a loaded configuration came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    File,
    /// The file did not exist
    Defaults,
}

impl ConfigSource {
    /// Logs how the configuration at `path` was obtained.
    pub fn log(self, path: &Path) {
        match self {
            ConfigSource::File => info!("Config loaded from {}", path.display()),
            ConfigSource::Defaults => {
                warn!("{} not found. Using default config.", path.display())
            }
        }
    }
}

/// Loads configuration from `path`, falling back to defaults when the file
/// does not exist. A file that exists but does not parse is an error.
///
/// Nothing is logged here, so this can run before logging is set up; pass
/// the returned source to [`ConfigSource::log`] afterwards.
pub fn load_config(path: &Path) -> Result<(BotConfig, ConfigSource)> {
    let (config, source) = if path.exists() {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: BotConfig = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        (config, ConfigSource::File)
    } else {
        (BotConfig::default(), ConfigSource::Defaults)
    };

    config.validate()?;
    Ok((config, source))
}

/// Writes the configuration as pretty-printed JSON.
pub fn save_config(config: &BotConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(config)?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_is_valid() {
        let config = BotConfig::default();
        config.validate().unwrap();
        assert_eq!(config.regions.ingredient_slots.len(), 8);
        assert_eq!(config.recipe_layout.step_slots.len(), 10);
        assert_eq!(config.page_turn_budget(), 2);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{ "controls": { "input_keys": ["Q", "W"], "page_turn_key": "Tab", "confirm_key": "Enter" },
                        "regions": { "recipe_list": {"left": 0, "top": 0, "width": 10, "height": 10},
                                     "ingredient_panel": {"left": 0, "top": 0, "width": 10, "height": 10},
                                     "ingredient_slots": [] } }"#;
        let config: BotConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.controls.input_keys, vec!["Q", "W"]);
        assert_eq!(config.bot_settings.retry_delay_ms, 500);
        assert_eq!(config.matching.fuzzy_threshold, None);
        assert_eq!(
            config.recipe_layout.extra_steps_policy,
            ExtraStepsPolicy::LastActivePage
        );
        config.validate().unwrap();
    }

    #[test]
    fn test_page_turn_budget_is_capped() {
        let mut config = BotConfig::default();
        config.bot_settings.max_page_turns = 9;
        assert_eq!(config.page_turn_budget(), MAX_PAGE_TURNS);
        config.bot_settings.max_page_turns = 1;
        assert_eq!(config.page_turn_budget(), 1);
    }

    #[test]
    fn test_validate_rejects_more_slots_than_keys() {
        let mut config = BotConfig::default();
        config.controls.input_keys.truncate(3);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_slot_outside_panel() {
        let mut config = BotConfig::default();
        let panel_width = config.regions.ingredient_panel.width;
        config.regions.ingredient_slots[0] = PixelRect::new(panel_width, 0, 60, 30);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("outside"));
    }

    #[test]
    fn test_validate_rejects_unknown_key() {
        let mut config = BotConfig::default();
        config.controls.confirm_key = "NotAKey".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_fuzzy_threshold() {
        let mut config = BotConfig::default();
        config.matching.fuzzy_threshold = Some(1.5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_extra_steps_policy_serde() {
        let policy: ExtraStepsPolicy = serde_json::from_str("\"ignore\"").unwrap();
        assert_eq!(policy, ExtraStepsPolicy::Ignore);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = BotConfig::default();
        config.bot_settings.retry_delay_ms = 42;
        save_config(&config, &path).unwrap();

        let (loaded, source) = load_config(&path).unwrap();
        assert_eq!(loaded.bot_settings.retry_delay_ms, 42);
        assert_eq!(source, ConfigSource::File);
    }

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let dir = tempdir().unwrap();
        let (loaded, source) = load_config(&dir.path().join("missing.json")).unwrap();
        assert_eq!(loaded.controls.confirm_key, "Enter");
        assert_eq!(source, ConfigSource::Defaults);
    }

    #[test]
    fn test_load_malformed_file_errors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(load_config(&path).is_err());
    }
}

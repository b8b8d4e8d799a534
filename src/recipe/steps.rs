//! Recipe step model: parsed steps per page, extra instructions and the
//! page-view state of one order.

use anyhow::Result;
use regex::Regex;
use tracing::warn;

use crate::automation::config::MAX_PAGE_TURNS;

/// Number of ingredient pages an order can span.
pub const PAGE_COUNT: usize = 3;

/// Default cap on a step's repeat count; covers every count word.
pub const DEFAULT_MAX_COUNT: u32 = 10;

/// Count written in brackets: "Nuggets (4)"
const NUMERIC_COUNT_PATTERN: &str = r"[({](\d+)[)}]";

/// Count written as a trailing word: "Roll twice", "Cut eight times"
const WORD_COUNT_PATTERN: &str =
    r"(?i)\b(once|twice|thrice|one|two|three|four|five|six|seven|eight|nine|ten)\b(?:\s+times)?$";

/// Separators between sub-steps. Parentheses are kept for counts.
const SEPARATOR_PATTERN: &str = r"[^\d\sA-Za-z()]| and ";

fn number_word_value(word: &str) -> Option<u32> {
    let value = match word.to_ascii_lowercase().as_str() {
        "once" | "one" => 1,
        "twice" | "two" => 2,
        "thrice" | "three" => 3,
        "four" => 4,
        "five" => 5,
        "six" => 6,
        "seven" => 7,
        "eight" => 8,
        "nine" => 9,
        "ten" => 10,
        _ => return None,
    };
    Some(value)
}

/// One required step: the text as read, the ingredient/action it names and
/// how many times its key must be pressed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecipeStep {
    pub text: String,
    pub action: String,
    pub count: u32,
}

impl RecipeStep {
    /// A single-press step whose text is the action.
    pub fn new(action: &str) -> Self {
        Self {
            text: action.to_string(),
            action: action.to_string(),
            count: 1,
        }
    }
}

/// Compiled patterns for step text.
pub struct StepSyntax {
    numeric_count: Regex,
    word_count: Regex,
    separator: Regex,
    max_count: u32,
}

impl StepSyntax {
    pub fn new() -> Result<Self> {
        Ok(Self {
            numeric_count: Regex::new(NUMERIC_COUNT_PATTERN)?,
            word_count: Regex::new(WORD_COUNT_PATTERN)?,
            separator: Regex::new(SEPARATOR_PATTERN)?,
            max_count: DEFAULT_MAX_COUNT,
        })
    }

    /// Sets the largest repeat count a step can parse to (at least 1).
    pub fn with_max_count(mut self, max_count: u32) -> Self {
        self.max_count = max_count.max(1);
        self
    }

    fn clamp_count(&self, count: u32, text: &str) -> u32 {
        if count > self.max_count {
            warn!(
                "Step '{}' asks for {} presses; clamping to {}",
                text, count, self.max_count
            );
            self.max_count
        } else {
            count
        }
    }

    /// Splits step text into action and repetition count.
    ///
    /// "Nuggets (4)" -> ("Nuggets", 4), "Roll twice" -> ("Roll", 2). Text with
    /// no count, or a count word with nothing before it, is one press.
    pub fn parse_step(&self, text: &str) -> RecipeStep {
        let text = text.trim();

        if let Some(caps) = self.numeric_count.captures(text) {
            // Digits only, so a failed parse is an overflow
            let count = caps[1].parse::<u32>().unwrap_or(u32::MAX).max(1);
            let count = self.clamp_count(count, text);
            let action = self.numeric_count.replace_all(text, "");
            let action = action.split_whitespace().collect::<Vec<_>>().join(" ");
            if !action.is_empty() {
                return RecipeStep {
                    text: text.to_string(),
                    action,
                    count,
                };
            }
        }

        if let Some(caps) = self.word_count.captures(text) {
            let whole = caps.get(0).map_or(text.len(), |m| m.start());
            let count = caps.get(1).and_then(|m| number_word_value(m.as_str()));
            let action = text[..whole].trim();
            if let (Some(count), false) = (count, action.is_empty()) {
                return RecipeStep {
                    text: text.to_string(),
                    action: action.to_string(),
                    count: self.clamp_count(count, text),
                };
            }
        }

        RecipeStep {
            text: text.to_string(),
            action: text.to_string(),
            count: 1,
        }
    }

    /// Splits text on separators, dropping empty pieces.
    pub fn split(&self, text: &str) -> Vec<String> {
        self.separator
            .split(text)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Expands one step line into sub-steps when it is longer than
    /// `char_threshold` and contains a separator; otherwise returns it as is.
    pub fn expand(&self, text: &str, char_threshold: usize) -> Vec<RecipeStep> {
        let text = text.trim();
        if text.is_empty() {
            return Vec::new();
        }
        if text.chars().count() > char_threshold && self.separator.is_match(text) {
            self.split(text).iter().map(|s| self.parse_step(s)).collect()
        } else {
            vec![self.parse_step(text)]
        }
    }

    /// Steps of the freeform extra-instructions string. Always split.
    pub fn extra_steps(&self, extra: &str) -> Vec<RecipeStep> {
        self.split(extra).iter().map(|s| self.parse_step(s)).collect()
    }
}

/// Everything read off the recipe list for one order.
///
/// Steps are fixed to their page once parsed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecipeSteps {
    pages: [Vec<RecipeStep>; PAGE_COUNT],
    extra: String,
}

impl RecipeSteps {
    pub fn new(pages: [Vec<RecipeStep>; PAGE_COUNT], extra: String) -> Self {
        Self { pages, extra }
    }

    /// Steps of a zero-based page; empty for pages past the last.
    pub fn page(&self, index: usize) -> &[RecipeStep] {
        self.pages.get(index).map_or(&[], |steps| steps.as_slice())
    }

    pub fn extra(&self) -> &str {
        &self.extra
    }

    /// No step on any page. Extra instructions alone are not a recipe.
    pub fn is_empty(&self) -> bool {
        self.step_count() == 0
    }

    pub fn step_count(&self) -> usize {
        self.pages.iter().map(|p| p.len()).sum()
    }

    /// One-line description for logs and the order CSV.
    pub fn summary(&self) -> String {
        let mut parts: Vec<String> = self
            .pages
            .iter()
            .enumerate()
            .filter(|(_, steps)| !steps.is_empty())
            .map(|(i, steps)| {
                let texts: Vec<&str> = steps.iter().map(|s| s.text.as_str()).collect();
                format!("p{}: {}", i + 1, texts.join(" | "))
            })
            .collect();
        if !self.extra.is_empty() {
            parts.push(format!("extra: {}", self.extra));
        }
        parts.join("; ")
    }
}

/// Which pages exist for the current order and how far through them we are.
#[derive(Clone, Debug)]
pub struct PageState {
    active: [bool; PAGE_COUNT],
    current: usize,
    turns: u8,
    budget: u8,
}

impl PageState {
    /// Page 1 always exists; `dots` are the page 2 and page 3 indicators.
    pub fn new(dots: [bool; 2], budget: u8) -> Self {
        Self {
            active: [true, dots[0], dots[1]],
            current: 0,
            turns: 0,
            budget: budget.min(MAX_PAGE_TURNS),
        }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn is_active(&self, page: usize) -> bool {
        self.active.get(page).copied().unwrap_or(false)
    }

    /// The page after the current one, if its indicator is lit.
    pub fn next_page(&self) -> Option<usize> {
        let next = self.current + 1;
        self.is_active(next).then_some(next)
    }

    pub fn turns_left(&self) -> u8 {
        self.budget.saturating_sub(self.turns)
    }

    /// Advances to the next page. `None` when there is no next page or the
    /// turn budget is spent.
    pub fn turn(&mut self) -> Option<usize> {
        let next = self.next_page()?;
        if self.turns_left() == 0 {
            return None;
        }
        self.turns += 1;
        self.current = next;
        Some(next)
    }

    /// Page views so far, counting the first.
    pub fn views(&self) -> u8 {
        self.turns + 1
    }
}

//! Step-to-key mapping for one page view.
//!
//! Steps are walked in recipe order, never slot order. Each step takes the
//! first unconsumed slot whose label equals its action; a slot is consumed at
//! most once per pass. Steps with no slot produce no keys and are reported as
//! unmatched.

use strsim::normalized_levenshtein;

use crate::automation::config::MatchingConfig;
use crate::automation::input::Key;
use crate::ocr::slots::SlotReading;

use super::steps::RecipeStep;

/// Outcome of mapping one page's steps.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MatchResult {
    /// Keys to press, in order
    pub keys: Vec<Key>,
    /// Steps that found a slot, in order
    pub matched: Vec<String>,
    /// Steps that found no slot, in order
    pub unmatched: Vec<String>,
}

impl MatchResult {
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Appends another pass (e.g. extra steps) to this one.
    pub fn extend(&mut self, other: MatchResult) {
        self.keys.extend(other.keys);
        self.matched.extend(other.matched);
        self.unmatched.extend(other.unmatched);
    }
}

/// Maps `steps` to key presses against the slots of the visible page.
///
/// `input_keys[i]` is the key bound to slot position `i`. A step with
/// `count` n presses its slot's key n times in a row.
pub fn map_steps_to_keys(
    steps: &[RecipeStep],
    slots: &[SlotReading],
    input_keys: &[Key],
    matching: &MatchingConfig,
) -> MatchResult {
    let mut consumed = vec![false; slots.len()];
    let mut result = MatchResult::default();

    for step in steps {
        let found = find_exact(&step.action, slots, &consumed).or_else(|| {
            matching
                .fuzzy_threshold
                .and_then(|threshold| find_fuzzy(&step.action, slots, &consumed, threshold))
        });

        let key = found.and_then(|index| {
            input_keys
                .get(slots[index].position)
                .map(|key| (index, *key))
        });

        match key {
            Some((index, key)) => {
                consumed[index] = true;
                result
                    .keys
                    .extend(std::iter::repeat_n(key, step.count as usize));
                result.matched.push(step.text.clone());
            }
            None => result.unmatched.push(step.text.clone()),
        }
    }

    result
}

fn find_exact(action: &str, slots: &[SlotReading], consumed: &[bool]) -> Option<usize> {
    slots
        .iter()
        .enumerate()
        .find(|(i, slot)| !consumed[*i] && slot.label.as_deref() == Some(action))
        .map(|(i, _)| i)
}

/// Best unconsumed slot by case-insensitive normalized Levenshtein similarity,
/// if it reaches `threshold`. Ties go to the earlier slot.
fn find_fuzzy(
    action: &str,
    slots: &[SlotReading],
    consumed: &[bool],
    threshold: f32,
) -> Option<usize> {
    let target = action.to_lowercase();
    let mut best: Option<(usize, f64)> = None;

    for (i, slot) in slots.iter().enumerate() {
        if consumed[i] {
            continue;
        }
        let Some(label) = slot.label.as_deref() else {
            continue;
        };
        let score = normalized_levenshtein(&target, &label.to_lowercase());
        if score >= threshold as f64 && best.is_none_or(|(_, s)| score > s) {
            best = Some((i, score));
        }
    }

    best.map(|(i, _)| i)
}

use image::GrayImage;
use tracing::{debug, warn};

use super::engine::{OcrLine, OcrWord, PageSegMode, TextRecognizer};

/// Lossy text extraction on top of a [`TextRecognizer`].
///
/// Never fails: recognizer errors and empty images come back as empty text,
/// with a warning for the former.
pub struct TextExtractor<'a> {
    recognizer: &'a dyn TextRecognizer,
    /// Words below this confidence are dropped
    min_confidence: f32,
    /// Gap in pixels that splits one line into two phrases
    gap_threshold: u32,
}

impl<'a> TextExtractor<'a> {
    pub fn new(recognizer: &'a dyn TextRecognizer, min_confidence: f32, gap_threshold: u32) -> Self {
        Self {
            recognizer,
            min_confidence,
            gap_threshold,
        }
    }

    fn lines(&self, img: &GrayImage, mode: PageSegMode) -> Vec<OcrLine> {
        if img.width() == 0 || img.height() == 0 {
            return Vec::new();
        }
        match self.recognizer.recognize(img, mode) {
            Ok(lines) => lines,
            Err(e) => {
                warn!("OCR failed, treating region as empty: {}", e);
                Vec::new()
            }
        }
    }

    /// Raw text: confident words joined by spaces, lines by newlines.
    pub fn extract(&self, img: &GrayImage, mode: PageSegMode) -> String {
        self.lines(img, mode)
            .iter()
            .map(|line| {
                confident_words(line, self.min_confidence)
                    .map(|w| w.text.as_str())
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Reads a region holding one label (e.g. an ingredient slot).
    pub fn extract_phrase(&self, img: &GrayImage) -> String {
        let lines = self.lines(img, PageSegMode::SingleLine);
        let phrase = parse_single_phrase(&lines, self.min_confidence);
        debug!("Parsed single phrase: '{}'", phrase);
        phrase
    }

    /// Reads a region holding several labels laid out on lines.
    pub fn extract_phrase_list(&self, img: &GrayImage) -> Vec<String> {
        let lines = self.lines(img, PageSegMode::Block);
        let phrases = parse_phrase_list(&lines, self.min_confidence, self.gap_threshold);
        debug!("Parsed phrase list: {:?}", phrases);
        phrases
    }
}

fn confident_words(line: &OcrLine, min_confidence: f32) -> impl Iterator<Item = &OcrWord> {
    line.words
        .iter()
        .filter(move |w| w.confidence >= min_confidence && !w.text.trim().is_empty())
}

/// Joins every confident word of every line into one phrase.
pub fn parse_single_phrase(lines: &[OcrLine], min_confidence: f32) -> String {
    let words: Vec<&str> = lines
        .iter()
        .flat_map(|line| confident_words(line, min_confidence))
        .map(|w| w.text.as_str())
        .collect();
    normalize_label(&words.join(" "))
}

/// Splits lines into phrases wherever two consecutive words on a line are
/// further apart than `gap_threshold` pixels.
pub fn parse_phrase_list(lines: &[OcrLine], min_confidence: f32, gap_threshold: u32) -> Vec<String> {
    let mut phrases = Vec::new();

    for line in lines {
        let mut words: Vec<&OcrWord> = confident_words(line, min_confidence).collect();
        words.sort_by_key(|w| w.left);

        let mut current: Vec<&str> = Vec::new();
        let mut previous_right: Option<u32> = None;
        for word in words {
            if let Some(right) = previous_right {
                if word.left.saturating_sub(right) >= gap_threshold && !current.is_empty() {
                    phrases.push(current.join(" "));
                    current.clear();
                }
            }
            current.push(word.text.as_str());
            previous_right = Some(word.left + word.width);
        }
        if !current.is_empty() {
            phrases.push(current.join(" "));
        }
    }

    phrases
}

/// Trims and collapses internal whitespace.
pub fn normalize_label(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

use anyhow::{anyhow, Result};
use image::GrayImage;
use std::path::PathBuf;
use std::process::Command;
use tempfile::NamedTempFile;

use super::setup::{find_tessdata_dir, find_tesseract_executable};

/// Characters Tesseract may emit. Ingredient and step text is plain
/// alphanumerics; limiting the set removes most punctuation noise.
const CHAR_WHITELIST: &str =
    " 0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ()";

/// Tesseract page segmentation mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageSegMode {
    /// PSM 6: a single uniform block of text
    Block,
    /// PSM 7: a single text line
    SingleLine,
}

impl PageSegMode {
    fn as_arg(&self) -> &'static str {
        match self {
            PageSegMode::Block => "6",
            PageSegMode::SingleLine => "7",
        }
    }
}

/// Represents a line of OCR text with confidence score
#[derive(Debug, Clone)]
pub struct OcrLine {
    pub text: String,
    pub words: Vec<OcrWord>,
    pub confidence: f32,
}

impl OcrLine {
    /// Builds a line from its words, joining text and averaging confidence.
    pub fn from_words(words: Vec<OcrWord>) -> Self {
        let confidence = if words.is_empty() {
            0.0
        } else {
            words.iter().map(|w| w.confidence).sum::<f32>() / words.len() as f32
        };
        let text = words
            .iter()
            .map(|w| w.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        Self {
            text,
            words,
            confidence,
        }
    }
}

/// Represents a single word from OCR with confidence score and horizontal extent
#[derive(Debug, Clone)]
pub struct OcrWord {
    pub text: String,
    pub confidence: f32,
    pub left: u32,
    pub width: u32,
}

/// Turns a prepared image into text lines.
///
/// Implementations may fail or return garbage; callers treat the result as
/// untrusted.
pub trait TextRecognizer {
    fn recognize(&self, img: &GrayImage, mode: PageSegMode) -> Result<Vec<OcrLine>>;
}

/// Runs the Tesseract executable and parses its TSV output.
pub struct TesseractEngine {
    executable: PathBuf,
    tessdata: Option<PathBuf>,
}

impl TesseractEngine {
    /// Locates Tesseract, preferring an explicitly configured executable.
    pub fn discover(configured: Option<&str>) -> Result<Self> {
        let executable = find_tesseract_executable(configured)?;
        let tessdata = find_tessdata_dir();
        Ok(Self {
            executable,
            tessdata,
        })
    }
}

impl TextRecognizer for TesseractEngine {
    fn recognize(&self, img: &GrayImage, mode: PageSegMode) -> Result<Vec<OcrLine>> {
        if img.width() == 0 || img.height() == 0 {
            return Ok(Vec::new());
        }

        // Save image to temporary file
        let temp_input = NamedTempFile::with_suffix(".png")?;
        img.save(temp_input.path())?;

        // Create temporary output file (Tesseract adds .tsv extension)
        let temp_output = NamedTempFile::new()?;
        let output_base = temp_output.path().to_string_lossy().to_string();

        let mut command = Command::new(&self.executable);
        command.arg(temp_input.path()).arg(&output_base);
        if let Some(tessdata) = &self.tessdata {
            command.arg("--tessdata-dir").arg(tessdata);
        }
        let output = command
            .arg("-l")
            .arg("eng")
            .arg("--oem")
            .arg("3")
            .arg("--psm")
            .arg(mode.as_arg())
            .arg("-c")
            .arg(format!("tessedit_char_whitelist={}", CHAR_WHITELIST))
            .arg("tsv")
            .output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("Tesseract failed: {}", stderr));
        }

        let tsv_path = format!("{}.tsv", output_base);
        let tsv_content = std::fs::read_to_string(&tsv_path)
            .map_err(|e| anyhow!("Failed to read Tesseract output: {}", e))?;
        let _ = std::fs::remove_file(&tsv_path);

        Ok(parse_tsv_output(&tsv_content))
    }
}

/// Parses Tesseract TSV output into lines of words.
///
/// Words are grouped by (block, paragraph, line). Rows with negative
/// confidence or empty text are skipped.
pub fn parse_tsv_output(tsv: &str) -> Vec<OcrLine> {
    let mut lines: Vec<OcrLine> = Vec::new();
    let mut current_key: Option<(i32, i32, i32)> = None;
    let mut current_words: Vec<OcrWord> = Vec::new();

    for line in tsv.lines().skip(1) {
        // Skip header
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 12 {
            continue;
        }

        // TSV fields: level, page_num, block_num, par_num, line_num, word_num,
        //             left, top, width, height, conf, text
        let level: i32 = fields[0].parse().unwrap_or(-1);
        if level != 5 {
            continue;
        }

        let text = fields[11].trim();
        let conf: f32 = fields[10].trim().parse().unwrap_or(-1.0);
        if text.is_empty() || conf < 0.0 {
            continue;
        }

        let key = (
            fields[2].parse().unwrap_or(-1),
            fields[3].parse().unwrap_or(-1),
            fields[4].parse().unwrap_or(-1),
        );
        if current_key.is_some_and(|k| k != key) && !current_words.is_empty() {
            lines.push(OcrLine::from_words(std::mem::take(&mut current_words)));
        }
        current_key = Some(key);

        current_words.push(OcrWord {
            text: text.to_string(),
            confidence: conf,
            left: fields[6].parse().unwrap_or(0),
            width: fields[8].parse().unwrap_or(0),
        });
    }

    // Don't forget the last line
    if !current_words.is_empty() {
        lines.push(OcrLine::from_words(current_words));
    }

    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str =
        "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext";

    fn row(block: i32, line: i32, word: i32, left: u32, width: u32, conf: f32, text: &str) -> String {
        format!("5\t1\t{block}\t1\t{line}\t{word}\t{left}\t10\t{width}\t20\t{conf}\t{text}")
    }

    #[test]
    fn test_parse_tsv_groups_words_by_line() {
        let tsv = [
            HEADER.to_string(),
            "1\t1\t0\t0\t0\t0\t0\t0\t200\t100\t-1\t".to_string(),
            row(1, 1, 1, 5, 40, 91.5, "Green"),
            row(1, 1, 2, 50, 50, 88.5, "Onions"),
            row(1, 2, 1, 5, 30, 70.0, "Beef"),
        ]
        .join("\n");

        let lines = parse_tsv_output(&tsv);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].text, "Green Onions");
        assert_eq!(lines[0].words[1].left, 50);
        assert!((lines[0].confidence - 90.0).abs() < 0.01);
        assert_eq!(lines[1].text, "Beef");
    }

    #[test]
    fn test_parse_tsv_skips_empty_and_negative_confidence() {
        let tsv = [
            HEADER.to_string(),
            row(1, 1, 1, 5, 40, -1.0, "ghost"),
            row(1, 1, 2, 50, 40, 90.0, " "),
        ]
        .join("\n");
        assert!(parse_tsv_output(&tsv).is_empty());
    }

    #[test]
    fn test_parse_tsv_separates_blocks_with_same_line_number() {
        let tsv = [
            HEADER.to_string(),
            row(1, 1, 1, 5, 40, 90.0, "Oil"),
            row(2, 1, 1, 300, 40, 90.0, "Rice"),
        ]
        .join("\n");
        let lines = parse_tsv_output(&tsv);
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn test_parse_tsv_empty_output() {
        assert!(parse_tsv_output("").is_empty());
        assert!(parse_tsv_output(HEADER).is_empty());
    }
}

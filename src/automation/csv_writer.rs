//! CSV log of processed orders.
//!
//! One row per order, appended as soon as the order ends so a crash loses at
//! most the order in progress.

use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use crate::automation::state::OrderReport;

/// Columns: timestamp, outcome, page views, recipe summary, keys pressed,
/// unmatched steps
const CSV_HEADER: &str = "timestamp,outcome,page_views,steps,keys,unmatched";

/// Initializes CSV file with header if it doesn't exist or is empty.
///
/// If the file exists and has content, this does nothing (preserves existing data).
pub fn init_csv(path: &Path) -> Result<()> {
    if path.exists() {
        let file = File::open(path).context("Failed to open existing CSV")?;
        let reader = BufReader::new(file);
        if reader.lines().next().is_some() {
            return Ok(());
        }
    }

    let mut file = File::create(path).context("Failed to create CSV file")?;
    writeln!(file, "{}", CSV_HEADER).context("Failed to write CSV header")?;
    Ok(())
}

/// Quotes a field when it holds a comma, quote or newline.
fn escape_field(field: &str) -> String {
    if field.contains([',', '"', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Appends one order row.
pub fn append_order(path: &Path, report: &OrderReport) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .context("Failed to open CSV for append")?;

    let keys: Vec<String> = report.keys.iter().map(|k| k.to_string()).collect();
    let line = [
        report.started_at.format("%Y-%m-%dT%H:%M:%S").to_string(),
        report.outcome.to_string(),
        report.page_views.to_string(),
        escape_field(&report.recipe),
        escape_field(&keys.join(" ")),
        escape_field(&report.unmatched.join(" | ")),
    ]
    .join(",");

    writeln!(file, "{}", line).context("Failed to write CSV row")?;
    Ok(())
}

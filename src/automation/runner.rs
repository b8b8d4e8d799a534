//! Automation runner - main entry point for the order loop.
//!
//! Orders are processed one at a time on the calling thread. Each run gets a
//! timestamped session folder under `output/` holding the order CSV and the
//! crops of slots OCR could not read.

use anyhow::{anyhow, Context, Result};
use chrono::Local;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::automation::config::BotConfig;
use crate::automation::csv_writer::{append_order, init_csv};
use crate::automation::input::{AbortSignal, DryRunEmitter, KeyEmitter, NeverAbort};
use crate::automation::state::{Collaborators, OrderContext, OrderOutcome, SessionResources};
use crate::capture::{ScreenCapture, ScreenshotCapture};
use crate::ocr::engine::{TesseractEngine, TextRecognizer};
use crate::recipe::parser::RecipeParser;

/// Files of one run.
pub struct SessionPaths {
    pub dir: PathBuf,
    pub csv: PathBuf,
    pub failed_slots: PathBuf,
}

impl SessionPaths {
    /// Creates `<output_dir>/YYYYMMDD_HHMMSS/` with its CSV header.
    pub fn create(output_dir: &Path) -> Result<Self> {
        let timestamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
        let dir = output_dir.join(&timestamp);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create session directory {}", dir.display()))?;

        let csv = dir.join("orders.csv");
        init_csv(&csv)?;

        Ok(Self {
            failed_slots: dir.join("failed_slots"),
            dir,
            csv,
        })
    }
}

/// Order counts for one run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub served: u32,
    pub aborted: u32,
    pub failed: u32,
}

impl RunSummary {
    pub fn total(&self) -> u32 {
        self.served + self.aborted + self.failed
    }
}

/// Processes orders until `max_orders` have ended (forever when `None`).
///
/// An aborted order is logged and the loop waits for the abort signal to
/// clear before looking for the next recipe. Order errors are logged and do
/// not stop the loop.
pub fn run_orders(
    resources: &SessionResources,
    capture: &dyn ScreenCapture,
    recognizer: &dyn TextRecognizer,
    emitter: &mut dyn KeyEmitter,
    abort: &dyn AbortSignal,
    csv_path: Option<&Path>,
    max_orders: Option<u32>,
) -> RunSummary {
    let retry_delay = Duration::from_millis(resources.config.bot_settings.retry_delay_ms);
    let mut summary = RunSummary::default();

    while max_orders.is_none_or(|max| summary.total() < max) {
        let order = summary.total() + 1;
        info!("Order {}: waiting for recipe", order);

        let mut ctx = OrderContext::new(
            resources,
            Collaborators {
                capture,
                recognizer,
                emitter: &mut *emitter,
                abort,
            },
        );
        if let Err(e) = ctx.run() {
            error!("Order {} failed in state '{}': {:#}", order, ctx.state, e);
        }

        match ctx.report.outcome {
            OrderOutcome::Served => summary.served += 1,
            OrderOutcome::Aborted => summary.aborted += 1,
            OrderOutcome::Failed | OrderOutcome::InProgress => summary.failed += 1,
        }

        if let Some(path) = csv_path {
            if let Err(e) = append_order(path, &ctx.report) {
                warn!("Failed to write order {} to CSV: {:#}", order, e);
            }
        }

        let outcome = ctx.report.outcome;
        drop(ctx);

        if max_orders.is_some_and(|max| summary.total() >= max) {
            break;
        }
        match outcome {
            OrderOutcome::Aborted => {
                info!("Order {} aborted; waiting for the abort signal to clear", order);
                while abort.is_triggered() {
                    std::thread::sleep(retry_delay);
                }
                info!("Abort signal cleared, resuming");
            }
            OrderOutcome::Failed | OrderOutcome::InProgress => std::thread::sleep(retry_delay),
            OrderOutcome::Served => {}
        }
    }

    info!(
        "Run finished: {} served, {} aborted, {} failed",
        summary.served, summary.aborted, summary.failed
    );
    summary
}

/// Processes one order against a saved screenshot. Keys are logged, never
/// sent.
pub fn dry_run(config: BotConfig, screenshot: &Path) -> Result<RunSummary> {
    let session = SessionPaths::create(&crate::paths::get_output_dir())?;
    let resources = SessionResources::new(config, Some(session.failed_slots.clone()))?;
    let engine = TesseractEngine::discover(resources.config.bot_settings.tesseract_path.as_deref())?;
    let capture = ScreenshotCapture::open(screenshot)?;

    // A still image never changes, so waiting for a recipe would never end
    let recipe = capture.capture(&resources.config.regions.recipe_list)?;
    let parser = RecipeParser::new(
        &engine,
        &resources.syntax,
        &resources.config.recipe_layout,
        &resources.config.bot_settings,
        &resources.config.matching,
    );
    if parser.parse(&recipe).is_empty() {
        return Err(anyhow!("No recipe found in {}", screenshot.display()));
    }

    let mut emitter = DryRunEmitter::default();
    let summary = run_orders(
        &resources,
        &capture,
        &engine,
        &mut emitter,
        &NeverAbort,
        Some(&session.csv),
        Some(1),
    );
    let keys: Vec<String> = emitter.pressed.iter().map(|k| k.to_string()).collect();
    info!("[dry-run] key sequence: {}", keys.join(" "));
    info!("Order log: {}", session.csv.display());
    Ok(summary)
}

/// Runs the live loop: desktop capture, SendInput, corner failsafe.
#[cfg(windows)]
pub fn run_live(config: BotConfig, max_orders: Option<u32>) -> Result<RunSummary> {
    use crate::automation::input::{CornerFailsafe, SendInputEmitter};
    use crate::capture::GdiCapture;

    let session = SessionPaths::create(&crate::paths::get_output_dir())?;
    info!("Session folder: {}", session.dir.display());
    let resources = SessionResources::new(config, Some(session.failed_slots.clone()))?;
    let engine = TesseractEngine::discover(resources.config.bot_settings.tesseract_path.as_deref())?;

    let settings = &resources.config.bot_settings;
    let failsafe = CornerFailsafe {
        margin: settings.failsafe_margin,
    };
    let abort: &dyn AbortSignal = if settings.enable_failsafe {
        info!(
            "Failsafe armed: move the cursor into the top-left corner to abort the current order"
        );
        &failsafe
    } else {
        warn!("Failsafe disabled");
        &NeverAbort
    };

    let mut emitter = SendInputEmitter;
    Ok(run_orders(
        &resources,
        &GdiCapture,
        &engine,
        &mut emitter,
        abort,
        Some(&session.csv),
        max_orders,
    ))
}

#[cfg(not(windows))]
pub fn run_live(_config: BotConfig, _max_orders: Option<u32>) -> Result<RunSummary> {
    Err(anyhow!(
        "Live mode needs Windows (desktop capture and SendInput); use dry-run instead"
    ))
}

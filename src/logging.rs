//! Log output: stdout plus an append-only file under `logs/`.

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, Layer};

/// Installs the global subscriber. Call once, before anything logs.
pub fn init_logging(level: &str, log_path: &Path) -> Result<()> {
    let level = LevelFilter::from_str(level)
        .with_context(|| format!("Invalid log level '{}'", level))?;

    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .with_context(|| format!("Failed to open log file {}", log_path.display()))?;

    let stdout_layer = fmt::layer().with_target(false).with_filter(level);
    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .with_filter(level);

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .context("Logging already initialized")?;

    Ok(())
}

/// Routes panics through the log before the default hook runs.
pub fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = if let Some(s) = info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };
        let location = info
            .location()
            .map(|loc| format!(" at {}:{}", loc.file(), loc.line()))
            .unwrap_or_default();
        tracing::error!("PANIC: {}{}", msg, location);
        default_hook(info);
    }));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_level_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = init_logging("loud", &dir.path().join("bot.log")).unwrap_err();
        assert!(err.to_string().contains("loud"));
    }
}

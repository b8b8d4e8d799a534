use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

#[cfg(windows)]
const EXECUTABLE_NAME: &str = "tesseract.exe";
#[cfg(not(windows))]
const EXECUTABLE_NAME: &str = "tesseract";

#[cfg(windows)]
const COMMON_INSTALL_DIRS: &[&str] = &[
    r"C:\Program Files\Tesseract-OCR",
    r"C:\Program Files (x86)\Tesseract-OCR",
];
#[cfg(not(windows))]
const COMMON_INSTALL_DIRS: &[&str] = &["/usr/bin", "/usr/local/bin", "/opt/homebrew/bin"];

#[cfg(windows)]
const SYSTEM_TESSDATA_DIRS: &[&str] = &[
    r"C:\Program Files\Tesseract-OCR\tessdata",
    r"C:\Program Files (x86)\Tesseract-OCR\tessdata",
];
#[cfg(not(windows))]
const SYSTEM_TESSDATA_DIRS: &[&str] = &[
    "/usr/share/tesseract-ocr/5/tessdata",
    "/usr/share/tesseract-ocr/4.00/tessdata",
    "/usr/share/tessdata",
    "/usr/local/share/tessdata",
];

/// Directories searched for a bundled Tesseract, in order:
/// `<exe_dir>/tesseract/` then the per-user data directory.
fn local_tesseract_dirs() -> Vec<PathBuf> {
    let mut dirs = vec![crate::paths::get_tesseract_dir()];
    if let Some(data) = dirs::data_local_dir() {
        dirs.push(data.join("csd2-bot").join("tesseract"));
    }
    dirs
}

/// Finds the Tesseract executable: configured path, local dirs, PATH, then
/// common install locations.
pub fn find_tesseract_executable(configured: Option<&str>) -> Result<PathBuf> {
    if let Some(path) = configured {
        let p = PathBuf::from(path);
        if p.exists() {
            info!("Using configured Tesseract at: {}", p.display());
            return Ok(p);
        }
        return Err(anyhow!(
            "Configured tesseract_path does not exist: {}",
            p.display()
        ));
    }

    for dir in local_tesseract_dirs() {
        let exe = dir.join(EXECUTABLE_NAME);
        if exe.exists() {
            info!("Tesseract found at: {}", exe.display());
            return Ok(exe);
        }
    }

    // Check PATH
    if let Ok(output) = Command::new("tesseract").arg("--version").output() {
        if output.status.success() {
            debug!("Using Tesseract from PATH");
            return Ok(PathBuf::from("tesseract"));
        }
    }

    for dir in COMMON_INSTALL_DIRS {
        let p = Path::new(dir).join(EXECUTABLE_NAME);
        if p.exists() {
            info!("Tesseract found at: {}", p.display());
            return Ok(p);
        }
    }

    Err(anyhow!(
        "Tesseract not found. Install Tesseract-OCR, add it to PATH, \
         or set bot_settings.tesseract_path in config.json"
    ))
}

/// Finds a tessdata directory holding eng.traineddata.
///
/// Returns `None` when nothing is found; Tesseract then falls back to its
/// compiled-in default.
pub fn find_tessdata_dir() -> Option<PathBuf> {
    let mut candidates: Vec<PathBuf> = local_tesseract_dirs()
        .into_iter()
        .map(|d| d.join("tessdata"))
        .collect();
    candidates.extend(SYSTEM_TESSDATA_DIRS.iter().map(PathBuf::from));

    // Check TESSDATA_PREFIX environment variable
    if let Ok(prefix) = std::env::var("TESSDATA_PREFIX") {
        let p = PathBuf::from(&prefix);
        candidates.push(p.join("tessdata"));
        candidates.push(p);
    }

    candidates
        .into_iter()
        .find(|dir| has_english_data(dir))
}

fn has_english_data(dir: &Path) -> bool {
    dir.join("eng.traineddata").exists()
}

//! On-request screenshot capture

use std::path::{Path, PathBuf};

use chrono::Local;

use super::frame::Frame;
use super::VisionError;

/// Write `frame` as `<dir>/<YYYYmmdd_HHMMSS>.png`
///
/// A numeric suffix is appended when a capture with the same timestamp
/// already exists. Returns the written path.
pub fn save_screenshot(frame: &Frame, dir: &Path) -> Result<PathBuf, VisionError> {
    std::fs::create_dir_all(dir)
        .map_err(|e| VisionError::Screenshot(format!("{}: {}", dir.display(), e)))?;

    let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
    let path = unique_path(dir, &stamp);

    frame
        .to_rgb_image()
        .save(&path)
        .map_err(|e| VisionError::Screenshot(format!("{}: {}", path.display(), e)))?;

    log::info!("Saved screenshot {}", path.display());
    Ok(path)
}

fn unique_path(dir: &Path, stem: &str) -> PathBuf {
    let first = dir.join(format!("{}.png", stem));
    if !first.exists() {
        return first;
    }

    (1..)
        .map(|n| dir.join(format!("{}_{}.png", stem, n)))
        .find(|path| !path.exists())
        .unwrap_or(first)
}

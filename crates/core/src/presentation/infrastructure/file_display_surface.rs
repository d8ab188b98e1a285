use std::path::{Path, PathBuf};

use crate::presentation::domain::display_surface::DisplaySurface;
use crate::shared::detection_result::DetectionResult;

/// Shows results by keeping the latest annotated frame in a file and
/// logging one line per detection.
///
/// Writes go to a sibling temp file that is then renamed over the target,
/// so a viewer polling the file never reads a half-written image.
pub struct FileDisplaySurface {
    path: PathBuf,
}

impl FileDisplaySurface {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_frame(&self, bytes: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut staging = self.path.clone().into_os_string();
        staging.push(".part");
        let staging = PathBuf::from(staging);
        std::fs::write(&staging, bytes)?;
        std::fs::rename(&staging, &self.path)
    }
}

impl DisplaySurface for FileDisplaySurface {
    fn render(&self, result: &DetectionResult) {
        if let Some(image) = &result.annotated_image {
            if let Err(e) = self.write_frame(image.bytes()) {
                log::warn!("Could not write {}: {e}", self.path.display());
            }
        }

        if result.detections.is_empty() {
            log::info!("No faces detected");
            return;
        }
        for (i, detection) in result.detections.iter().enumerate() {
            log::info!("Detection {}: {}", i + 1, detection.describe());
        }
        let flagged = result.non_compliant_count();
        if flagged > 0 {
            log::warn!("{flagged} of {} faces not wearing a mask correctly", result.detections.len());
        }
    }

    fn clear(&self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Could not clear {}: {e}", self.path.display()),
        }
    }
}

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::shared::constants::{
    CAMERA_IDEAL_HEIGHT, CAMERA_IDEAL_WIDTH, DEFAULT_DETECTOR_URL, DEFAULT_OUTPUT_NAME,
    DEFAULT_REFRESH_HZ, DEFAULT_STREAM_URL, FRAME_STRIDE, JPEG_QUALITY, MIN_SUBMIT_INTERVAL_MS,
    REQUEST_TIMEOUT_MS,
};

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("could not determine config directory")]
    NoConfigDir,
    #[error("failed to write settings to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("invalid setting: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    /// Device path or name handed to the capture driver.
    pub device: String,
    /// ffmpeg input device format (`v4l2`, `avfoundation`, `dshow`).
    pub driver: String,
    pub width: u32,
    pub height: u32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            device: default_camera_device().to_string(),
            driver: default_camera_driver().to_string(),
            width: CAMERA_IDEAL_WIDTH,
            height: CAMERA_IDEAL_HEIGHT,
        }
    }
}

#[cfg(target_os = "macos")]
fn default_camera_device() -> &'static str {
    "0"
}

#[cfg(target_os = "windows")]
fn default_camera_device() -> &'static str {
    "video=Integrated Camera"
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn default_camera_device() -> &'static str {
    "/dev/video0"
}

#[cfg(target_os = "macos")]
fn default_camera_driver() -> &'static str {
    "avfoundation"
}

#[cfg(target_os = "windows")]
fn default_camera_driver() -> &'static str {
    "dshow"
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn default_camera_driver() -> &'static str {
    "video4linux2"
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub detector_url: String,
    pub stream_url: String,
    pub camera: CameraSettings,
    pub jpeg_quality: u8,
    pub frame_stride: u64,
    pub min_submit_interval_ms: u64,
    pub refresh_hz: f64,
    pub request_timeout_ms: u64,
    pub output: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            detector_url: DEFAULT_DETECTOR_URL.to_string(),
            stream_url: DEFAULT_STREAM_URL.to_string(),
            camera: CameraSettings::default(),
            jpeg_quality: JPEG_QUALITY,
            frame_stride: FRAME_STRIDE,
            min_submit_interval_ms: MIN_SUBMIT_INTERVAL_MS,
            refresh_hz: DEFAULT_REFRESH_HZ,
            request_timeout_ms: REQUEST_TIMEOUT_MS,
            output: PathBuf::from(DEFAULT_OUTPUT_NAME),
        }
    }
}

impl Settings {
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("MaskGuard").join("settings.json"))
    }

    /// Loads user settings, falling back to defaults when the file is
    /// missing or unreadable.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> Self {
        let Ok(json) = fs::read_to_string(path) else {
            return Self::default();
        };
        match serde_json::from_str(&json) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("Ignoring malformed settings at {}: {e}", path.display());
                Self::default()
            }
        }
    }

    pub fn save(&self) -> Result<PathBuf, SettingsError> {
        let path = Self::config_path().ok_or(SettingsError::NoConfigDir)?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| SettingsError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|e| SettingsError::Write {
            path: path.to_path_buf(),
            source: e,
        })
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(SettingsError::Invalid(format!(
                "JPEG quality must be between 1 and 100, got {}",
                self.jpeg_quality
            )));
        }
        if self.frame_stride == 0 {
            return Err(SettingsError::Invalid(
                "frame stride must be at least 1".to_string(),
            ));
        }
        if !(self.refresh_hz > 0.0 && self.refresh_hz <= 1000.0) {
            return Err(SettingsError::Invalid(format!(
                "refresh rate must be in (0, 1000] Hz, got {}",
                self.refresh_hz
            )));
        }
        if self.request_timeout_ms == 0 {
            return Err(SettingsError::Invalid(
                "request timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn min_submit_interval(&self) -> Duration {
        Duration::from_millis(self.min_submit_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn refresh_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.refresh_hz)
    }
}

pub const DEFAULT_DETECTOR_URL: &str = "http://localhost:5000/webcam";
pub const DEFAULT_STREAM_URL: &str = "http://localhost:5000";

/// JPEG quality on the `image` crate's 1-100 scale (0.8 of full quality).
pub const JPEG_QUALITY: u8 = 80;

/// Only every Nth frame is eligible for detection.
pub const FRAME_STRIDE: u64 = 3;

/// Floor between two detection submissions.
pub const MIN_SUBMIT_INTERVAL_MS: u64 = 50;

/// Assumed display refresh rate when no real display drives the loop.
pub const DEFAULT_REFRESH_HZ: f64 = 60.0;

pub const CAMERA_IDEAL_WIDTH: u32 = 640;
pub const CAMERA_IDEAL_HEIGHT: u32 = 480;

pub const REQUEST_TIMEOUT_MS: u64 = 10_000;

pub const DEFAULT_OUTPUT_NAME: &str = "maskguard-latest.jpg";

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "gif", "webp"];

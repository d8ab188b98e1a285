use thiserror::Error;

use crate::shared::frame::Frame;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("camera unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("camera input driver '{0}' is not available")]
    UnknownDriver(String),
    #[error("camera delivered no video stream")]
    NoVideoStream,
    #[error("camera already open")]
    AlreadyOpen,
}

/// Properties of an opened capture device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceInfo {
    pub width: u32,
    pub height: u32,
}

/// A live capture device exposing its most recent frame on demand.
///
/// `open` acquires the device; `release` gives it back and must be safe to
/// call on a source that is not open. Between the two, `current_frame`
/// returns the latest decoded frame once `is_ready` reports that enough
/// data has been buffered.
pub trait FrameSource: Send {
    fn open(&mut self) -> Result<SourceInfo, CaptureError>;

    fn is_ready(&self) -> bool;

    fn current_frame(&self) -> Option<Frame>;

    fn release(&mut self);
}

use thiserror::Error;

use crate::shared::encoded_image::EncodedImage;
use crate::shared::frame::Frame;

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("frame has no pixel data yet")]
    EmptyFrame,
    #[error("unsupported channel count {0}")]
    UnsupportedChannels(u8),
    #[error("image encoding failed: {0}")]
    Image(#[from] image::ImageError),
}

/// Compresses a raw frame into a transmittable still image.
///
/// Implementations must keep the frame's native dimensions.
pub trait FrameEncoder: Send + Sync {
    fn encode(&self, frame: &Frame) -> Result<EncodedImage, EncodeError>;
}

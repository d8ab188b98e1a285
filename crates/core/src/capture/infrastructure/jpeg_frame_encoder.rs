use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

use crate::capture::domain::frame_encoder::{EncodeError, FrameEncoder};
use crate::shared::constants::JPEG_QUALITY;
use crate::shared::encoded_image::EncodedImage;
use crate::shared::frame::Frame;

/// Lossy JPEG encoding via the `image` crate at a fixed quality.
pub struct JpegFrameEncoder {
    quality: u8,
}

impl JpegFrameEncoder {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }
}

impl Default for JpegFrameEncoder {
    fn default() -> Self {
        Self::new(JPEG_QUALITY)
    }
}

impl FrameEncoder for JpegFrameEncoder {
    fn encode(&self, frame: &Frame) -> Result<EncodedImage, EncodeError> {
        if frame.is_empty() {
            return Err(EncodeError::EmptyFrame);
        }
        let color = match frame.channels() {
            3 => ExtendedColorType::Rgb8,
            1 => ExtendedColorType::L8,
            other => return Err(EncodeError::UnsupportedChannels(other)),
        };

        // Rough upper bound so typical frames encode without reallocating.
        let mut buf = Vec::with_capacity(frame.data().len() / 4);
        let mut encoder = JpegEncoder::new_with_quality(&mut buf, self.quality);
        encoder.encode(frame.data(), frame.width(), frame.height(), color)?;
        Ok(EncodedImage::jpeg(buf))
    }
}

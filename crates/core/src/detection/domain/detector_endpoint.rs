use thiserror::Error;

use crate::shared::detection_result::DetectionResult;
use crate::shared::encoded_image::EncodedImage;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detector unreachable: {0}")]
    Transport(String),
    #[error("detection failed: {0}")]
    Rejected(String),
    #[error("malformed detector response: {0}")]
    Malformed(String),
}

/// The remote request/response detector.
///
/// One call per image, no retries. Any response that is not a success
/// (transport error, non-2xx status, `success=false`) comes back as an
/// error; the caller decides whether it matters.
pub trait DetectorEndpoint: Send + Sync {
    fn detect(&self, image: &EncodedImage) -> Result<DetectionResult, DetectorError>;
}

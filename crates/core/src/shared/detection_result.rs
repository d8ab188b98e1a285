use serde::{Deserialize, Serialize};

use crate::shared::encoded_image::EncodedImage;

/// Display legend for the detector's class codes.
///
/// The mapping is presentation-only; the detector contract carries raw
/// integer codes and never depends on these labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaskClass {
    WithMask,
    NoMask,
    IncorrectMask,
    Unknown(i64),
}

impl MaskClass {
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => MaskClass::WithMask,
            1 => MaskClass::NoMask,
            2 => MaskClass::IncorrectMask,
            other => MaskClass::Unknown(other),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            MaskClass::WithMask => "With Mask",
            MaskClass::NoMask => "No Mask",
            MaskClass::IncorrectMask => "Incorrect Mask",
            MaskClass::Unknown(_) => "Unknown",
        }
    }

    pub fn is_compliant(&self) -> bool {
        matches!(self, MaskClass::WithMask)
    }
}

impl std::fmt::Display for MaskClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// One classified object as reported by a remote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(rename = "class")]
    pub class_code: i64,
    #[serde(default)]
    pub confidence: f64,
}

impl Detection {
    pub fn new(class_code: i64, confidence: f64) -> Self {
        Self {
            class_code,
            confidence,
        }
    }

    pub fn class(&self) -> MaskClass {
        MaskClass::from_code(self.class_code)
    }

    /// e.g. `With Mask: 93.1% confidence`
    pub fn describe(&self) -> String {
        format!(
            "{}: {:.1}% confidence",
            self.class(),
            self.confidence * 100.0
        )
    }
}

/// Annotated frame plus its detections, always produced by one response.
///
/// Holders swap whole values; the image and the list are never updated
/// independently.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionResult {
    pub annotated_image: Option<EncodedImage>,
    pub detections: Vec<Detection>,
}

impl DetectionResult {
    pub fn new(annotated_image: Option<EncodedImage>, detections: Vec<Detection>) -> Self {
        Self {
            annotated_image,
            detections,
        }
    }

    pub fn non_compliant_count(&self) -> usize {
        self.detections
            .iter()
            .filter(|d| !d.class().is_compliant())
            .count()
    }
}

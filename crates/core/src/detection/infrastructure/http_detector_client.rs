use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::detection::domain::detector_endpoint::{DetectorEndpoint, DetectorError};
use crate::shared::detection_result::{Detection, DetectionResult};
use crate::shared::encoded_image::EncodedImage;

const DEFAULT_FAILURE_MESSAGE: &str = "Detection failed";

#[derive(Serialize)]
struct DetectRequest<'a> {
    image: &'a str,
}

#[derive(Deserialize)]
struct DetectResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    detections: Vec<Detection>,
    #[serde(default)]
    error: Option<String>,
}

/// Detector endpoint over HTTP: `POST {"image": <data URL>}` and a JSON
/// reply carrying the annotated frame and per-object detections.
pub struct HttpDetectorClient {
    url: String,
    client: reqwest::blocking::Client,
}

impl HttpDetectorClient {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, DetectorError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DetectorError::Transport(e.to_string()))?;
        Ok(Self {
            url: url.to_string(),
            client,
        })
    }
}

impl DetectorEndpoint for HttpDetectorClient {
    fn detect(&self, image: &EncodedImage) -> Result<DetectionResult, DetectorError> {
        log::debug!(
            "Posting {} bytes of {} to {}",
            image.bytes().len(),
            image.mime(),
            self.url
        );
        let data_url = image.to_data_url();
        let response = self
            .client
            .post(&self.url)
            .json(&DetectRequest { image: &data_url })
            .send()
            .map_err(|e| DetectorError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|e| DetectorError::Transport(e.to_string()))?;

        if !status.is_success() {
            log::debug!("Detector answered {status} for {}", self.url);
        }
        parse_response(status.is_success(), &body)
    }
}

/// Non-2xx and `success=false` are the same business failure; the body's
/// `error` field is the message when present.
fn parse_response(status_ok: bool, body: &str) -> Result<DetectionResult, DetectorError> {
    let parsed: DetectResponse = match serde_json::from_str(body) {
        Ok(parsed) => parsed,
        Err(_) if !status_ok => {
            return Err(DetectorError::Rejected(DEFAULT_FAILURE_MESSAGE.to_string()))
        }
        Err(e) => return Err(DetectorError::Malformed(e.to_string())),
    };

    if !status_ok || !parsed.success {
        return Err(DetectorError::Rejected(
            parsed
                .error
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_string()),
        ));
    }

    let annotated = parsed
        .image
        .filter(|s| !s.is_empty())
        .map(|s| decode_image(&s))
        .transpose()?;

    Ok(DetectionResult::new(annotated, parsed.detections))
}

fn decode_image(payload: &str) -> Result<EncodedImage, DetectorError> {
    let decoded = if payload.starts_with("data:") {
        EncodedImage::from_data_url(payload)
    } else {
        EncodedImage::from_base64_jpeg(payload)
    };
    decoded.map_err(|e| DetectorError::Malformed(e.to_string()))
}

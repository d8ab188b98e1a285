use std::path::Path;
use std::sync::Arc;

use crate::pipeline::detection_request_pipeline::DetectionRequestPipeline;
use crate::shared::detection_result::DetectionResult;
use crate::shared::encoded_image::EncodedImage;

/// One-shot detection of a still image file: read → detect → display.
pub struct DetectImageUseCase {
    pipeline: Arc<DetectionRequestPipeline>,
}

impl DetectImageUseCase {
    pub fn new(pipeline: Arc<DetectionRequestPipeline>) -> Self {
        Self { pipeline }
    }

    /// Sends the file as-is (no re-encoding) and returns the result that is
    /// now on display.
    pub fn execute(
        &self,
        input_path: &Path,
    ) -> Result<Arc<DetectionResult>, Box<dyn std::error::Error>> {
        if !input_path.is_file() {
            return Err(format!(
                "No image at {}; please select an image first",
                input_path.display()
            )
            .into());
        }

        let mime = image::ImageFormat::from_path(input_path)
            .map(|format| format.to_mime_type())
            .map_err(|_| format!("Unsupported image type: {}", input_path.display()))?;
        let bytes = std::fs::read(input_path)?;
        log::debug!("Uploading {} ({} bytes, {mime})", input_path.display(), bytes.len());

        let image = EncodedImage::new(mime, bytes);
        self.pipeline
            .submit_still(&image)?
            .ok_or_else(|| "A detection request is already in flight; try again".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::domain::detector_endpoint::{DetectorEndpoint, DetectorError};
    use crate::detection::domain::throttle_gate::ThrottleGate;
    use crate::pipeline::session_logger::null_logger;
    use crate::shared::detection_result::Detection;
    use crate::shared::result_store::ResultStore;
    use std::sync::Mutex;

    // --- Stubs ---

    struct RecordingEndpoint {
        seen: Mutex<Vec<EncodedImage>>,
        reply: Result<Vec<Detection>, &'static str>,
    }

    impl DetectorEndpoint for RecordingEndpoint {
        fn detect(&self, image: &EncodedImage) -> Result<DetectionResult, DetectorError> {
            self.seen.lock().unwrap().push(image.clone());
            match &self.reply {
                Ok(detections) => Ok(DetectionResult::new(
                    Some(EncodedImage::jpeg(vec![0xFF, 0xD8])),
                    detections.clone(),
                )),
                Err(message) => Err(DetectorError::Rejected(message.to_string())),
            }
        }
    }

    fn setup(
        reply: Result<Vec<Detection>, &'static str>,
    ) -> (DetectImageUseCase, Arc<RecordingEndpoint>, Arc<ResultStore>) {
        let endpoint = Arc::new(RecordingEndpoint {
            seen: Mutex::new(Vec::new()),
            reply,
        });
        let store = Arc::new(ResultStore::headless());
        let pipeline = Arc::new(DetectionRequestPipeline::new(
            endpoint.clone(),
            ThrottleGate::default(),
            store.clone(),
            null_logger(),
        ));
        (DetectImageUseCase::new(pipeline), endpoint, store)
    }

    #[test]
    fn test_uploads_file_with_matching_mime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("group.png");
        std::fs::write(&path, b"\x89PNG fake").unwrap();
        let (use_case, endpoint, store) = setup(Ok(vec![Detection::new(0, 0.97)]));

        let result = use_case.execute(&path).unwrap();

        let seen = endpoint.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].mime(), "image/png");
        assert_eq!(seen[0].bytes(), b"\x89PNG fake");
        assert_eq!(result.detections, vec![Detection::new(0, 0.97)]);
        assert_eq!(store.current().unwrap().detections.len(), 1);
    }

    #[test]
    fn test_jpeg_extension_maps_to_jpeg_mime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("face.jpg");
        std::fs::write(&path, [0xFF, 0xD8, 0xFF, 0xD9]).unwrap();
        let (use_case, endpoint, _) = setup(Ok(vec![]));

        use_case.execute(&path).unwrap();

        assert_eq!(endpoint.seen.lock().unwrap()[0].mime(), "image/jpeg");
    }

    #[test]
    fn test_missing_file_asks_for_an_image() {
        let dir = tempfile::tempdir().unwrap();
        let (use_case, endpoint, _) = setup(Ok(vec![]));

        let err = use_case.execute(&dir.path().join("nope.jpg")).unwrap_err();

        assert!(err.to_string().contains("please select an image first"));
        assert!(endpoint.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_unknown_extension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "hello").unwrap();
        let (use_case, endpoint, _) = setup(Ok(vec![]));

        let err = use_case.execute(&path).unwrap_err();

        assert!(err.to_string().contains("Unsupported image type"));
        assert!(endpoint.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_detector_failure_message_is_surfaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("face.jpeg");
        std::fs::write(&path, [0xFF, 0xD8]).unwrap();
        let (use_case, _, store) = setup(Err("no face detected"));

        let err = use_case.execute(&path).unwrap_err();

        assert!(err.to_string().contains("no face detected"));
        assert!(store.current().is_none());
    }
}

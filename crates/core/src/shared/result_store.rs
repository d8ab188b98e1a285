use std::sync::{Arc, Mutex, MutexGuard};

use crate::presentation::domain::display_surface::{DisplaySurface, NullDisplaySurface};
use crate::shared::detection_result::DetectionResult;

/// The UI-visible detection result, shared between the capture loop, the
/// detection workers and whoever renders.
///
/// Values are swapped as a whole `Arc`, so a reader can never see the image
/// of one response next to the detections of another.
pub struct ResultStore {
    current: Mutex<Option<Arc<DetectionResult>>>,
    surface: Arc<dyn DisplaySurface>,
}

impl ResultStore {
    pub fn new(surface: Arc<dyn DisplaySurface>) -> Self {
        Self {
            current: Mutex::new(None),
            surface,
        }
    }

    pub fn headless() -> Self {
        Self::new(Arc::new(NullDisplaySurface))
    }

    pub fn replace(&self, result: DetectionResult) -> Arc<DetectionResult> {
        let mut current = self.lock();
        self.store(&mut current, result)
    }

    /// Replaces the result only if `admit` still holds once the store is
    /// locked. A `clear` issued after whatever `admit` checks can therefore
    /// never be overtaken by this result.
    pub fn replace_if(
        &self,
        result: DetectionResult,
        admit: impl FnOnce() -> bool,
    ) -> Option<Arc<DetectionResult>> {
        let mut current = self.lock();
        if !admit() {
            return None;
        }
        Some(self.store(&mut current, result))
    }

    fn store(
        &self,
        current: &mut MutexGuard<'_, Option<Arc<DetectionResult>>>,
        result: DetectionResult,
    ) -> Arc<DetectionResult> {
        let result = Arc::new(result);
        **current = Some(result.clone());
        self.surface.render(&result);
        result
    }

    pub fn clear(&self) {
        let mut current = self.lock();
        if current.take().is_some() {
            self.surface.clear();
        }
    }

    pub fn current(&self) -> Option<Arc<DetectionResult>> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Arc<DetectionResult>>> {
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ResultStore {
    fn default() -> Self {
        Self::headless()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::detection_result::Detection;
    use crate::shared::encoded_image::EncodedImage;
    use std::thread;

    #[derive(Default)]
    struct RecordingSurface {
        renders: Mutex<Vec<usize>>,
        clears: Mutex<usize>,
    }

    impl DisplaySurface for RecordingSurface {
        fn render(&self, result: &DetectionResult) {
            self.renders.lock().unwrap().push(result.detections.len());
        }

        fn clear(&self) {
            *self.clears.lock().unwrap() += 1;
        }
    }

    fn result(tag: u8, count: usize) -> DetectionResult {
        DetectionResult::new(
            Some(EncodedImage::jpeg(vec![tag; 4])),
            vec![Detection::new(tag as i64, 0.5); count],
        )
    }

    #[test]
    fn test_starts_empty() {
        assert!(ResultStore::headless().current().is_none());
    }

    #[test]
    fn test_replace_swaps_whole_value() {
        let store = ResultStore::headless();
        store.replace(result(1, 1));
        store.replace(result(2, 3));

        let current = store.current().unwrap();
        assert_eq!(current.detections.len(), 3);
        assert_eq!(current.annotated_image.as_ref().unwrap().bytes(), &[2u8; 4]);
    }

    #[test]
    fn test_replace_and_clear_reach_surface() {
        let surface = Arc::new(RecordingSurface::default());
        let store = ResultStore::new(surface.clone());

        store.replace(result(1, 2));
        store.clear();

        assert_eq!(*surface.renders.lock().unwrap(), vec![2]);
        assert_eq!(*surface.clears.lock().unwrap(), 1);
        assert!(store.current().is_none());
    }

    #[test]
    fn test_replace_if_skips_rejected_result() {
        let surface = Arc::new(RecordingSurface::default());
        let store = ResultStore::new(surface.clone());
        store.replace(result(1, 1));

        assert!(store.replace_if(result(2, 2), || false).is_none());
        let applied = store.replace_if(result(3, 3), || true).unwrap();

        assert_eq!(applied.detections.len(), 3);
        assert_eq!(*surface.renders.lock().unwrap(), vec![1, 3]);
    }

    #[test]
    fn test_clear_on_empty_store_does_not_touch_surface() {
        let surface = Arc::new(RecordingSurface::default());
        let store = ResultStore::new(surface.clone());

        store.clear();

        assert_eq!(*surface.clears.lock().unwrap(), 0);
    }

    #[test]
    fn test_concurrent_readers_never_see_mixed_results() {
        let store = Arc::new(ResultStore::headless());
        let writer = {
            let store = store.clone();
            thread::spawn(move || {
                for i in 0..200u32 {
                    let tag = (i % 5) as u8 + 1;
                    store.replace(result(tag, tag as usize));
                }
            })
        };

        for _ in 0..200 {
            if let Some(current) = store.current() {
                let tag = current.annotated_image.as_ref().unwrap().bytes()[0];
                assert_eq!(current.detections.len(), tag as usize);
                assert!(current
                    .detections
                    .iter()
                    .all(|d| d.class_code == tag as i64));
            }
        }
        writer.join().unwrap();
    }
}

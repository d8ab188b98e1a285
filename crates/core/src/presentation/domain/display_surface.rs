use crate::shared::detection_result::DetectionResult;

/// Where annotated output ends up.
///
/// Polling results and pushed stream frames both land here. Calls are made
/// while the result store is locked, so a clear can never be overtaken by
/// an older render. A slow surface delays readers of the current result,
/// not frame admission or mode changes.
pub trait DisplaySurface: Send + Sync {
    fn render(&self, result: &DetectionResult);

    fn clear(&self);
}

/// Discards everything. Used for headless runs and tests.
pub struct NullDisplaySurface;

impl DisplaySurface for NullDisplaySurface {
    fn render(&self, _result: &DetectionResult) {}
    fn clear(&self) {}
}

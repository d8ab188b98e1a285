use std::time::{Duration, Instant};

use crate::shared::constants::{FRAME_STRIDE, MIN_SUBMIT_INTERVAL_MS};

/// Decides whether a captured frame may be sent for detection.
///
/// A frame is eligible only when its counter lands on the stride AND the
/// minimum interval has passed since the last accepted frame. The stride
/// bounds the call rate to a fraction of the refresh rate; the interval is
/// an absolute floor for fast displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleGate {
    stride: u64,
    min_interval: Duration,
}

impl ThrottleGate {
    pub fn new(stride: u64, min_interval: Duration) -> Result<Self, &'static str> {
        if stride < 1 {
            return Err("stride must be >= 1");
        }
        Ok(Self {
            stride,
            min_interval,
        })
    }

    pub fn stride(&self) -> u64 {
        self.stride
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// `last_processed` is `None` until the first frame of a session has
    /// been accepted.
    pub fn should_process(
        &self,
        frame_counter: u64,
        now: Instant,
        last_processed: Option<Instant>,
    ) -> bool {
        if frame_counter % self.stride != 0 {
            return false;
        }
        match last_processed {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.min_interval,
        }
    }
}

impl Default for ThrottleGate {
    fn default() -> Self {
        Self {
            stride: FRAME_STRIDE,
            min_interval: Duration::from_millis(MIN_SUBMIT_INTERVAL_MS),
        }
    }
}

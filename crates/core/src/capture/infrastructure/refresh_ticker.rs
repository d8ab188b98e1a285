use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;

use crate::capture::domain::display_refresh::DisplayRefresh;

/// Paces the capture loop at a nominal display refresh rate when no real
/// display vsync is available (headless CLI runs).
///
/// Ticks that the loop is too busy to take are dropped by the underlying
/// ticker rather than queued, so a slow tick never causes a burst later.
pub struct RefreshTicker {
    period: Duration,
}

impl RefreshTicker {
    pub fn new(period: Duration) -> Self {
        Self {
            period: period.max(Duration::from_millis(1)),
        }
    }
}

impl DisplayRefresh for RefreshTicker {
    fn subscribe(&mut self) -> Receiver<Instant> {
        crossbeam_channel::tick(self.period)
    }
}

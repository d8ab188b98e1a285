use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

pub const STAGE_ENCODE: &str = "encode";
pub const STAGE_DETECT: &str = "detect";

pub const EVENT_TICK: &str = "ticks";
pub const EVENT_NOT_READY: &str = "not_ready";
pub const EVENT_THROTTLED: &str = "throttled";
pub const EVENT_IN_FLIGHT: &str = "in_flight";
pub const EVENT_ENCODE_FAILED: &str = "encode_failed";
pub const EVENT_FAILED: &str = "failed";
pub const EVENT_APPLIED: &str = "applied";
pub const EVENT_STALE: &str = "stale";

/// Cross-cutting observer for capture and detection sessions.
///
/// Decouples the loop and the request pipeline from where their telemetry
/// ends up (log output, tests, nothing at all).
pub trait SessionLogger: Send {
    /// Record how long a named stage took for one frame.
    fn timing(&mut self, stage: &str, duration_ms: f64);

    /// Count one occurrence of a named event (tick, drop, failure...).
    fn count(&mut self, event: &str);

    /// Log a human-readable status message.
    fn info(&mut self, message: &str);

    /// Emit an end-of-session summary. Default: no-op.
    fn summary(&self) {}

    /// Forget everything recorded so far; called when a new session starts.
    fn reset(&mut self) {}
}

pub type SharedSessionLogger = Arc<Mutex<dyn SessionLogger>>;

pub fn null_logger() -> SharedSessionLogger {
    Arc::new(Mutex::new(NullSessionLogger))
}

/// Runs `f` against the shared logger, ignoring poisoning.
pub fn with_logger(logger: &SharedSessionLogger, f: impl FnOnce(&mut dyn SessionLogger)) {
    let mut guard = logger.lock().unwrap_or_else(|e| e.into_inner());
    f(&mut *guard);
}

/// Silent logger that discards all events.
pub struct NullSessionLogger;

impl SessionLogger for NullSessionLogger {
    fn timing(&mut self, _stage: &str, _duration_ms: f64) {}
    fn count(&mut self, _event: &str) {}
    fn info(&mut self, _message: &str) {}
}

/// Running aggregate of one stage's timings.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StageStats {
    pub samples: u64,
    pub total_ms: f64,
    pub max_ms: f64,
}

impl StageStats {
    fn record(&mut self, duration_ms: f64) {
        self.samples += 1;
        self.total_ms += duration_ms;
        self.max_ms = self.max_ms.max(duration_ms);
    }

    pub fn avg_ms(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.total_ms / self.samples as f64
        }
    }
}

/// CLI-oriented logger that tracks per-stage timings and event counts and
/// reports a summary when the session ends.
pub struct StdoutSessionLogger {
    timings: HashMap<String, StageStats>,
    counters: HashMap<String, u64>,
    start_time: Instant,
}

impl StdoutSessionLogger {
    pub fn new() -> Self {
        Self {
            timings: HashMap::new(),
            counters: HashMap::new(),
            start_time: Instant::now(),
        }
    }

    /// Returns the formatted summary string, or `None` if nothing was recorded.
    pub fn summary_string(&self) -> Option<String> {
        if self.timings.is_empty() && self.counters.is_empty() {
            return None;
        }

        let elapsed_s = self.start_time.elapsed().as_secs_f64();
        let ticks = self.count_of(EVENT_TICK);
        let mut lines = Vec::new();

        lines.push(format!(
            "Session summary ({ticks} ticks, {elapsed_s:.1}s total):"
        ));

        let mut stages: Vec<_> = self.timings.keys().collect();
        stages.sort();
        for stage in stages {
            let stats = self.timings[stage];
            lines.push(format!(
                "  {stage:8}: avg {:6.1}ms  max {:6.1}ms  ({} samples)",
                stats.avg_ms(),
                stats.max_ms,
                stats.samples
            ));
        }

        let mut events: Vec<_> = self.counters.iter().collect();
        events.sort();
        for (event, count) in events {
            lines.push(format!("  {event}: {count}"));
        }

        let applied = self.count_of(EVENT_APPLIED);
        if applied > 0 && elapsed_s > 0.0 {
            lines.push(format!(
                "  Result rate: {:.1} results/s",
                applied as f64 / elapsed_s
            ));
        }

        Some(lines.join("\n"))
    }

    pub fn timings_for(&self, stage: &str) -> Option<StageStats> {
        self.timings.get(stage).copied()
    }

    pub fn count_of(&self, event: &str) -> u64 {
        self.counters.get(event).copied().unwrap_or(0)
    }
}

impl Default for StdoutSessionLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionLogger for StdoutSessionLogger {
    fn timing(&mut self, stage: &str, duration_ms: f64) {
        self.timings
            .entry(stage.to_string())
            .or_default()
            .record(duration_ms);
    }

    fn count(&mut self, event: &str) {
        *self.counters.entry(event.to_string()).or_default() += 1;
    }

    fn info(&mut self, message: &str) {
        log::info!("{message}");
    }

    fn summary(&self) {
        if let Some(text) = self.summary_string() {
            log::info!("\n\n{text}");
        }
    }

    fn reset(&mut self) {
        self.timings.clear();
        self.counters.clear();
        self.start_time = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_logger_all_methods_are_noop() {
        let mut logger = NullSessionLogger;
        logger.timing(STAGE_DETECT, 5.0);
        logger.count(EVENT_TICK);
        logger.info("hello");
        logger.summary();
    }

    #[test]
    fn test_timing_records_values() {
        let mut logger = StdoutSessionLogger::new();
        logger.timing(STAGE_DETECT, 20.0);
        logger.timing(STAGE_DETECT, 30.0);
        logger.timing(STAGE_ENCODE, 5.0);

        let detect = logger.timings_for(STAGE_DETECT).unwrap();
        assert_eq!(detect.samples, 2);
        approx::assert_relative_eq!(detect.total_ms, 50.0);
        approx::assert_relative_eq!(detect.max_ms, 30.0);
        approx::assert_relative_eq!(detect.avg_ms(), 25.0);
        assert_eq!(logger.timings_for(STAGE_ENCODE).unwrap().samples, 1);
    }

    #[test]
    fn test_count_accumulates_per_event() {
        let mut logger = StdoutSessionLogger::new();
        logger.count(EVENT_TICK);
        logger.count(EVENT_TICK);
        logger.count(EVENT_THROTTLED);

        assert_eq!(logger.count_of(EVENT_TICK), 2);
        assert_eq!(logger.count_of(EVENT_THROTTLED), 1);
        assert_eq!(logger.count_of(EVENT_FAILED), 0);
    }

    #[test]
    fn test_summary_includes_stages_and_counters() {
        let mut logger = StdoutSessionLogger::new();
        logger.count(EVENT_TICK);
        logger.count(EVENT_IN_FLIGHT);
        logger.timing(STAGE_DETECT, 12.0);

        let summary = logger.summary_string().unwrap();
        assert!(summary.contains("Session summary (1 ticks"));
        assert!(summary.contains("detect"));
        assert!(summary.contains("in_flight: 1"));
    }

    #[test]
    fn test_summary_reports_result_rate_once_results_applied() {
        let mut logger = StdoutSessionLogger::new();
        logger.count(EVENT_APPLIED);
        std::thread::sleep(std::time::Duration::from_millis(5));

        let summary = logger.summary_string().unwrap();
        assert!(summary.contains("results/s"));
    }

    #[test]
    fn test_empty_summary_returns_none() {
        assert!(StdoutSessionLogger::new().summary_string().is_none());
    }

    #[test]
    fn test_reset_starts_a_fresh_session() {
        let mut logger = StdoutSessionLogger::new();
        logger.count(EVENT_TICK);
        logger.timing(STAGE_ENCODE, 4.0);

        logger.reset();

        assert_eq!(logger.count_of(EVENT_TICK), 0);
        assert!(logger.timings_for(STAGE_ENCODE).is_none());
        assert!(logger.summary_string().is_none());
    }

    #[test]
    fn test_with_logger_reaches_shared_instance() {
        let concrete = Arc::new(Mutex::new(StdoutSessionLogger::new()));
        let shared: SharedSessionLogger = concrete.clone();

        with_logger(&shared, |l| l.count(EVENT_STALE));

        assert_eq!(concrete.lock().unwrap().count_of(EVENT_STALE), 1);
    }
}

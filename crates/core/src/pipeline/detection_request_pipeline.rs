use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Instant;

use thiserror::Error;

use crate::detection::domain::detector_endpoint::{DetectorEndpoint, DetectorError};
use crate::detection::domain::throttle_gate::ThrottleGate;
use crate::pipeline::session_logger::{
    with_logger, SharedSessionLogger, EVENT_APPLIED, EVENT_FAILED, EVENT_IN_FLIGHT, EVENT_STALE,
    EVENT_THROTTLED, STAGE_DETECT,
};
use crate::shared::detection_result::DetectionResult;
use crate::shared::encoded_image::EncodedImage;
use crate::shared::result_store::ResultStore;

/// A detection attempt that was sent but produced nothing usable.
///
/// Always recoverable: the frame is dropped and the next eligible frame
/// supersedes it.
#[derive(Error, Debug)]
#[error("detection request failed: {0}")]
pub struct DetectionError(#[from] pub DetectorError);

/// Outcome of asking whether a frame would be accepted right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Eligible,
    Throttled,
    Busy,
}

#[derive(Debug, Default)]
struct PipelineState {
    last_processed: Option<Instant>,
    processing: bool,
    generation: u64,
}

type SharedState = Arc<Mutex<PipelineState>>;

fn lock(state: &SharedState) -> MutexGuard<'_, PipelineState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

/// Proof that this caller owns the single in-flight slot.
///
/// Dropping it clears the processing flag, so every exit path of a request
/// (success, rejection, transport error, panic) releases the slot.
struct InFlight {
    state: SharedState,
    generation: u64,
    label: String,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        lock(&self.state).processing = false;
    }
}

struct PipelineInner {
    endpoint: Arc<dyn DetectorEndpoint>,
    state: SharedState,
    results: Arc<ResultStore>,
    logger: SharedSessionLogger,
}

impl PipelineInner {
    fn run(&self, ticket: InFlight, image: &EncodedImage) -> Result<Option<Arc<DetectionResult>>, DetectionError> {
        let started = Instant::now();
        let outcome = self.endpoint.detect(image);
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        with_logger(&self.logger, |l| l.timing(STAGE_DETECT, elapsed_ms));

        let result = match outcome {
            Ok(result) => result,
            Err(e) => {
                log::warn!("Dropping {}: {e}", ticket.label);
                with_logger(&self.logger, |l| l.count(EVENT_FAILED));
                return Err(DetectionError(e));
            }
        };

        // The generation is read under the store lock and the state lock is
        // released before rendering, so admission checks never wait on the
        // display.
        let applied = self
            .results
            .replace_if(result, || lock(&self.state).generation == ticket.generation);

        match applied {
            Some(result) => {
                log::debug!(
                    "Applied {} ({} detections, {elapsed_ms:.0}ms)",
                    ticket.label,
                    result.detections.len()
                );
                with_logger(&self.logger, |l| l.count(EVENT_APPLIED));
                Ok(Some(result))
            }
            None => {
                log::debug!("Discarding {} from an ended session", ticket.label);
                with_logger(&self.logger, |l| l.count(EVENT_STALE));
                Ok(None)
            }
        }
    }
}

/// Sends frames to the detector with at most one request in flight.
///
/// Admission (throttle check, single-flight check, timestamp update) is
/// synchronous and cheap; the network call either runs on the caller's
/// thread (`submit`) or on a worker thread (`submit_detached`). Every
/// request carries the session generation it was admitted under, and a
/// response from an older generation is discarded instead of applied.
pub struct DetectionRequestPipeline {
    gate: ThrottleGate,
    inner: Arc<PipelineInner>,
}

impl DetectionRequestPipeline {
    pub fn new(
        endpoint: Arc<dyn DetectorEndpoint>,
        gate: ThrottleGate,
        results: Arc<ResultStore>,
        logger: SharedSessionLogger,
    ) -> Self {
        Self {
            gate,
            inner: Arc::new(PipelineInner {
                endpoint,
                state: Arc::new(Mutex::new(PipelineState::default())),
                results,
                logger,
            }),
        }
    }

    pub fn results(&self) -> &Arc<ResultStore> {
        &self.inner.results
    }

    pub fn is_in_flight(&self) -> bool {
        lock(&self.inner.state).processing
    }

    pub fn generation(&self) -> u64 {
        lock(&self.inner.state).generation
    }

    /// Starts a fresh session: new generation, throttle history forgotten.
    pub fn begin_session(&self) -> u64 {
        let mut state = lock(&self.inner.state);
        state.generation += 1;
        state.last_processed = None;
        state.generation
    }

    /// Ends the current session. Requests still in flight keep running but
    /// their results are discarded; the visible result is cleared.
    pub fn end_session(&self) {
        {
            let mut state = lock(&self.inner.state);
            state.generation += 1;
            state.last_processed = None;
        }
        self.inner.results.clear();
    }

    /// Runs one frame through throttle, single-flight and detection on the
    /// calling thread. `Ok(None)` means the frame was not sent or its result
    /// belonged to an ended session.
    pub fn submit(
        &self,
        frame_counter: u64,
        now: Instant,
        image: &EncodedImage,
    ) -> Result<Option<Arc<DetectionResult>>, DetectionError> {
        match self.admit(Some(frame_counter), now) {
            Some(ticket) => self.inner.run(ticket, image),
            None => Ok(None),
        }
    }

    /// Like `submit`, but only admission happens on the calling thread; the
    /// request itself runs on a worker. Returns the worker handle when the
    /// frame was admitted.
    pub fn submit_detached(
        &self,
        frame_counter: u64,
        now: Instant,
        image: EncodedImage,
    ) -> Option<JoinHandle<()>> {
        let ticket = self.admit(Some(frame_counter), now)?;
        let inner = self.inner.clone();
        let spawned = std::thread::Builder::new()
            .name("detect-worker".to_string())
            .spawn(move || {
                // Failures are already logged and counted inside `run`.
                let _ = inner.run(ticket, &image);
            });
        match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                log::error!("Could not start detection worker: {e}");
                None
            }
        }
    }

    /// Sends a one-off still image. The frame stride does not apply, the
    /// single-flight rule does.
    pub fn submit_still(
        &self,
        image: &EncodedImage,
    ) -> Result<Option<Arc<DetectionResult>>, DetectionError> {
        match self.admit(None, Instant::now()) {
            Some(ticket) => self.inner.run(ticket, image),
            None => Ok(None),
        }
    }

    /// Non-mutating preview of admission, so callers can skip encoding a
    /// frame that would be dropped anyway. The answer may be stale by the
    /// time `submit` runs; `submit` decides for real.
    pub fn check(&self, frame_counter: u64, now: Instant) -> Admission {
        let state = lock(&self.inner.state);
        if !self.gate.should_process(frame_counter, now, state.last_processed) {
            Admission::Throttled
        } else if state.processing {
            Admission::Busy
        } else {
            Admission::Eligible
        }
    }

    fn admit(&self, frame_counter: Option<u64>, now: Instant) -> Option<InFlight> {
        let mut state = lock(&self.inner.state);

        if let Some(counter) = frame_counter {
            if !self.gate.should_process(counter, now, state.last_processed) {
                drop(state);
                with_logger(&self.inner.logger, |l| l.count(EVENT_THROTTLED));
                return None;
            }
        }
        if state.processing {
            drop(state);
            with_logger(&self.inner.logger, |l| l.count(EVENT_IN_FLIGHT));
            return None;
        }

        state.last_processed = Some(now);
        state.processing = true;
        Some(InFlight {
            state: self.inner.state.clone(),
            generation: state.generation,
            label: match frame_counter {
                Some(counter) => format!("frame {counter}"),
                None => "still image".to_string(),
            },
        })
    }
}

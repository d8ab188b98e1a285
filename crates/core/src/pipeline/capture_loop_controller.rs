use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam_channel::{select, Receiver, Sender};

use crate::capture::domain::display_refresh::DisplayRefresh;
use crate::capture::domain::frame_encoder::FrameEncoder;
use crate::capture::domain::frame_source::{CaptureError, FrameSource, SourceInfo};
use crate::pipeline::detection_request_pipeline::{Admission, DetectionRequestPipeline};
use crate::pipeline::session_logger::{
    with_logger, SharedSessionLogger, EVENT_ENCODE_FAILED, EVENT_IN_FLIGHT, EVENT_NOT_READY,
    EVENT_THROTTLED, EVENT_TICK, STAGE_ENCODE,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Stopped,
    Running,
}

struct RunningLoop {
    stop_tx: Sender<()>,
    handle: JoinHandle<Box<dyn FrameSource>>,
}

/// Drives polling detection from a live camera.
///
/// While running, a dedicated thread wakes on every display refresh tick,
/// bumps the frame counter and hands eligible frames to the request
/// pipeline without waiting for the network. The camera is moved into that
/// thread for the session and handed back when it joins, so exactly one
/// place releases it.
pub struct CaptureLoopController {
    source: Option<Box<dyn FrameSource>>,
    refresh: Box<dyn DisplayRefresh>,
    encoder: Arc<dyn FrameEncoder>,
    pipeline: Arc<DetectionRequestPipeline>,
    logger: SharedSessionLogger,
    running: Option<RunningLoop>,
}

impl CaptureLoopController {
    pub fn new(
        source: Box<dyn FrameSource>,
        refresh: Box<dyn DisplayRefresh>,
        encoder: Arc<dyn FrameEncoder>,
        pipeline: Arc<DetectionRequestPipeline>,
        logger: SharedSessionLogger,
    ) -> Self {
        Self {
            source: Some(source),
            refresh,
            encoder,
            pipeline,
            logger,
            running: None,
        }
    }

    pub fn state(&self) -> LoopState {
        if self.running.is_some() {
            LoopState::Running
        } else {
            LoopState::Stopped
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == LoopState::Running
    }

    pub fn pipeline(&self) -> &Arc<DetectionRequestPipeline> {
        &self.pipeline
    }

    /// Opens the camera and starts the tick loop. A camera that cannot be
    /// opened leaves the controller stopped.
    pub fn start(&mut self) -> Result<SourceInfo, CaptureError> {
        if self.running.is_some() {
            return Err(CaptureError::AlreadyOpen);
        }
        let mut source = self.source.take().ok_or_else(|| {
            CaptureError::DeviceUnavailable("camera handle lost after a capture loop failure".into())
        })?;

        let info = match source.open() {
            Ok(info) => info,
            Err(e) => {
                self.source = Some(source);
                return Err(e);
            }
        };

        let session = self.pipeline.begin_session();
        with_logger(&self.logger, |l| {
            l.reset();
            l.info(&format!(
                "Camera opened at {}x{} (session {session})",
                info.width, info.height
            ))
        });

        let ticks = self.refresh.subscribe();
        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
        let worker = LoopWorker {
            encoder: self.encoder.clone(),
            pipeline: self.pipeline.clone(),
            logger: self.logger.clone(),
        };
        let handle = std::thread::spawn(move || worker.run(source, ticks, stop_rx));

        self.running = Some(RunningLoop { stop_tx, handle });
        Ok(info)
    }

    /// Stops scheduling, releases the camera and clears the visible result.
    /// Calling it while stopped does nothing.
    pub fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        // The loop may already have exited on its own if the refresh source
        // went away; a failed send is fine then.
        let _ = running.stop_tx.send(());
        match running.handle.join() {
            Ok(mut source) => {
                source.release();
                self.source = Some(source);
            }
            Err(_) => log::error!("Capture loop panicked; camera was dropped with it"),
        }

        self.pipeline.end_session();
        with_logger(&self.logger, |l| {
            l.info("Camera released");
            l.summary();
        });
    }
}

impl Drop for CaptureLoopController {
    fn drop(&mut self) {
        self.stop();
    }
}

struct LoopWorker {
    encoder: Arc<dyn FrameEncoder>,
    pipeline: Arc<DetectionRequestPipeline>,
    logger: SharedSessionLogger,
}

impl LoopWorker {
    fn run(
        self,
        source: Box<dyn FrameSource>,
        ticks: Receiver<Instant>,
        stop_rx: Receiver<()>,
    ) -> Box<dyn FrameSource> {
        let mut frame_counter: u64 = 0;
        loop {
            select! {
                recv(stop_rx) -> _ => break,
                recv(ticks) -> tick => match tick {
                    Ok(now) => {
                        frame_counter += 1;
                        self.on_tick(source.as_ref(), frame_counter, now);
                    }
                    Err(_) => {
                        log::warn!("Display refresh ended; capture loop idle until stopped");
                        break;
                    }
                },
            }
        }
        source
    }

    fn on_tick(&self, source: &dyn FrameSource, frame_counter: u64, now: Instant) {
        with_logger(&self.logger, |l| l.count(EVENT_TICK));

        if !source.is_ready() {
            with_logger(&self.logger, |l| l.count(EVENT_NOT_READY));
            return;
        }

        match self.pipeline.check(frame_counter, now) {
            Admission::Eligible => {}
            Admission::Throttled => {
                with_logger(&self.logger, |l| l.count(EVENT_THROTTLED));
                return;
            }
            Admission::Busy => {
                with_logger(&self.logger, |l| l.count(EVENT_IN_FLIGHT));
                return;
            }
        }

        let Some(frame) = source.current_frame() else {
            with_logger(&self.logger, |l| l.count(EVENT_NOT_READY));
            return;
        };

        let started = Instant::now();
        match self.encoder.encode(&frame) {
            Ok(image) => {
                let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
                with_logger(&self.logger, |l| l.timing(STAGE_ENCODE, elapsed_ms));
                // Detached: the loop never waits on the network.
                let _ = self.pipeline.submit_detached(frame_counter, now, image);
            }
            Err(e) => {
                log::warn!("Skipping frame {frame_counter}: {e}");
                with_logger(&self.logger, |l| l.count(EVENT_ENCODE_FAILED));
            }
        }
    }
}

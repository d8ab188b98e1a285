use thiserror::Error;

use crate::capture::domain::frame_source::CaptureError;
use crate::pipeline::capture_loop_controller::CaptureLoopController;
use crate::streaming::domain::control_intent::{ControlIntent, Coordinator};
use crate::streaming::domain::stream_channel::ChannelError;
use crate::streaming::push_stream_session::PushStreamSession;

#[derive(Error, Debug)]
pub enum LiveFeedError {
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveFeedMode {
    Off,
    /// Local camera, frames sent to the detector by the capture loop.
    Polling,
    /// Server-side capture, annotated frames pushed over the channel.
    Streaming,
}

/// The single live feed a user sees: either polling or streaming, never
/// both. Switching modes tears the active one down before the other
/// acquires anything.
pub struct LiveFeed {
    capture: CaptureLoopController,
    stream: PushStreamSession,
}

impl LiveFeed {
    pub fn new(capture: CaptureLoopController, stream: PushStreamSession) -> Self {
        Self { capture, stream }
    }

    pub fn mode(&self) -> LiveFeedMode {
        if self.capture.is_running() {
            LiveFeedMode::Polling
        } else if self.stream.is_streaming() {
            LiveFeedMode::Streaming
        } else {
            LiveFeedMode::Off
        }
    }

    pub fn intent(&self) -> ControlIntent {
        self.stream.intent()
    }

    pub fn capture(&self) -> &CaptureLoopController {
        &self.capture
    }

    pub fn stream(&self) -> &PushStreamSession {
        &self.stream
    }

    pub fn start_polling(&mut self) -> Result<(), LiveFeedError> {
        if self.mode() == LiveFeedMode::Polling {
            return Ok(());
        }
        self.stream.stop();
        let info = self.capture.start()?;
        log::info!("Polling from camera at {}x{}", info.width, info.height);
        Ok(())
    }

    pub fn start_streaming(&mut self) -> Result<(), LiveFeedError> {
        if self.mode() == LiveFeedMode::Streaming {
            return Ok(());
        }
        self.capture.stop();
        self.stream.start()?;
        Ok(())
    }

    pub fn stop(&mut self) {
        self.capture.stop();
        self.stream.stop();
    }

    pub fn toggle_debug(&mut self) -> bool {
        self.stream.toggle_debug()
    }

    pub fn toggle_coordinator(&mut self) -> Coordinator {
        self.stream.toggle_coordinator()
    }
}

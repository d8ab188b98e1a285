use crossbeam_channel::Receiver;
use thiserror::Error;

use crate::shared::detection_result::DetectionResult;

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("invalid stream url '{0}'")]
    InvalidUrl(String),
    #[error("could not reach stream service: {0}")]
    Connect(String),
    #[error("stream service handshake failed: {0}")]
    Handshake(String),
    #[error("stream channel is closed")]
    Closed,
}

/// Client-to-server control signals. None of them carry a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlSignal {
    StartStream,
    StopStream,
    ToggleDebug,
    ToggleCoordinator,
}

impl ControlSignal {
    pub fn event_name(&self) -> &'static str {
        match self {
            ControlSignal::StartStream => "start_stream",
            ControlSignal::StopStream => "stop_stream",
            ControlSignal::ToggleDebug => "toggle_debug",
            ControlSignal::ToggleCoordinator => "toggle_coordinator",
        }
    }
}

/// Server-to-client traffic, already decoded.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// An annotated frame rendered by the server, with its detections.
    FrameUpdate(DetectionResult),
    /// The server reported a problem. Informational only.
    ServerError(String),
    /// The channel is gone; no further events follow.
    Closed,
}

/// Write half of an open channel.
pub trait SignalSender: Send {
    /// Fire-and-forget: success means the signal was queued, not that the
    /// server acted on it.
    fn emit(&mut self, signal: ControlSignal) -> Result<(), ChannelError>;

    /// Disconnects. Safe to call more than once.
    fn close(&mut self);
}

/// An open bidirectional channel to the streaming service.
pub struct StreamLink {
    pub signals: Box<dyn SignalSender>,
    pub events: Receiver<ChannelEvent>,
}

/// Opens channels to the streaming service.
pub trait StreamConnector: Send + Sync {
    fn connect(&self) -> Result<StreamLink, ChannelError>;
}

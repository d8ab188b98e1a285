use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use crossbeam_channel::Receiver;

use crate::shared::result_store::ResultStore;
use crate::streaming::domain::control_intent::{ControlIntent, Coordinator};
use crate::streaming::domain::stream_channel::{
    ChannelError, ChannelEvent, ControlSignal, SignalSender, StreamConnector, StreamLink,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Connecting,
    Streaming,
}

type SharedState = Arc<Mutex<StreamState>>;

fn lock(state: &SharedState) -> MutexGuard<'_, StreamState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

struct ActiveLink {
    signals: Box<dyn SignalSender>,
    dispatcher: JoinHandle<()>,
}

/// Consumes server-rendered frames over a persistent channel.
///
/// The session owns the channel while streaming. Frames arriving on it
/// replace the displayed result directly, newest wins. Leaving the
/// streaming state (explicitly or by drop) sends `stop_stream` before the
/// channel is closed, so the server stops producing for nobody.
pub struct PushStreamSession {
    connector: Box<dyn StreamConnector>,
    results: Arc<ResultStore>,
    state: SharedState,
    intent: ControlIntent,
    link: Option<ActiveLink>,
}

impl PushStreamSession {
    pub fn new(connector: Box<dyn StreamConnector>, results: Arc<ResultStore>) -> Self {
        Self {
            connector,
            results,
            state: Arc::new(Mutex::new(StreamState::Idle)),
            intent: ControlIntent::default(),
            link: None,
        }
    }

    pub fn state(&self) -> StreamState {
        *lock(&self.state)
    }

    pub fn is_streaming(&self) -> bool {
        self.state() == StreamState::Streaming
    }

    pub fn intent(&self) -> ControlIntent {
        self.intent
    }

    pub fn results(&self) -> &Arc<ResultStore> {
        &self.results
    }

    /// Opens the channel and asks the server to start streaming. Does
    /// nothing if already streaming.
    pub fn start(&mut self) -> Result<(), ChannelError> {
        if self.state() != StreamState::Idle {
            return Ok(());
        }
        // A channel the server closed on its own still holds its threads.
        self.release_link(false);

        *lock(&self.state) = StreamState::Connecting;
        let StreamLink {
            mut signals,
            events,
        } = match self.connector.connect() {
            Ok(link) => link,
            Err(e) => {
                *lock(&self.state) = StreamState::Idle;
                return Err(e);
            }
        };

        if let Err(e) = signals.emit(ControlSignal::StartStream) {
            signals.close();
            *lock(&self.state) = StreamState::Idle;
            return Err(e);
        }

        *lock(&self.state) = StreamState::Streaming;
        let state = self.state.clone();
        let results = self.results.clone();
        let dispatcher = std::thread::spawn(move || dispatch(events, state, results));
        self.link = Some(ActiveLink {
            signals,
            dispatcher,
        });
        log::info!("Streaming started");
        Ok(())
    }

    /// Asks the server to stop, closes the channel and clears the display.
    /// Calling it while idle does nothing.
    pub fn stop(&mut self) {
        let was_streaming = {
            let mut state = lock(&self.state);
            let was_streaming = *state == StreamState::Streaming;
            *state = StreamState::Idle;
            was_streaming
        };
        if self.release_link(was_streaming) {
            self.results.clear();
            log::info!("Streaming stopped");
        }
    }

    pub fn toggle_debug(&mut self) -> bool {
        let enabled = self.intent.toggle_debug();
        self.send_control(ControlSignal::ToggleDebug);
        enabled
    }

    pub fn toggle_coordinator(&mut self) -> Coordinator {
        let coordinator = self.intent.toggle_coordinator();
        self.send_control(ControlSignal::ToggleCoordinator);
        coordinator
    }

    /// The local intent has already been flipped; a lost signal is only
    /// logged.
    fn send_control(&mut self, signal: ControlSignal) {
        match self.link.as_mut() {
            Some(link) => {
                if let Err(e) = link.signals.emit(signal) {
                    log::warn!("Could not send {}: {e}", signal.event_name());
                }
            }
            None => log::debug!(
                "Not connected; {} only updates the local setting",
                signal.event_name()
            ),
        }
    }

    /// Returns whether there was a link to release.
    fn release_link(&mut self, send_stop: bool) -> bool {
        let Some(mut link) = self.link.take() else {
            return false;
        };
        if send_stop {
            if let Err(e) = link.signals.emit(ControlSignal::StopStream) {
                log::warn!("Could not send stop_stream: {e}");
            }
        }
        link.signals.close();
        if link.dispatcher.join().is_err() {
            log::error!("Stream dispatcher panicked");
        }
        true
    }
}

impl Drop for PushStreamSession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Applies channel events until the channel closes. Frames that queued up
/// while a render was in progress are skipped in favour of the newest.
fn dispatch(events: Receiver<ChannelEvent>, state: SharedState, results: Arc<ResultStore>) {
    while let Ok(first) = events.recv() {
        let mut latest = None;
        let mut closed = false;
        for event in std::iter::once(first).chain(events.try_iter()) {
            match event {
                ChannelEvent::FrameUpdate(result) => latest = Some(result),
                ChannelEvent::ServerError(message) => log::error!("Stream error: {message}"),
                ChannelEvent::Closed => closed = true,
            }
        }

        if let Some(result) = latest {
            results.replace_if(result, || *lock(&state) == StreamState::Streaming);
        }
        if closed {
            let mut state = lock(&state);
            if *state == StreamState::Streaming {
                log::warn!("Stream channel closed; toggle streaming to reconnect");
            }
            *state = StreamState::Idle;
            return;
        }
    }
    *lock(&state) = StreamState::Idle;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presentation::domain::display_surface::DisplaySurface;
    use crate::shared::detection_result::{Detection, DetectionResult};
    use crate::shared::encoded_image::EncodedImage;
    use crossbeam_channel::Sender;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    // --- Stubs ---

    type Journal = Arc<Mutex<Vec<String>>>;

    struct FakeSender {
        journal: Journal,
        events: Option<Sender<ChannelEvent>>,
    }

    impl SignalSender for FakeSender {
        fn emit(&mut self, signal: ControlSignal) -> Result<(), ChannelError> {
            if self.events.is_none() {
                return Err(ChannelError::Closed);
            }
            self.journal.lock().unwrap().push(signal.event_name().to_string());
            Ok(())
        }

        fn close(&mut self) {
            if let Some(events) = self.events.take() {
                self.journal.lock().unwrap().push("close".to_string());
                let _ = events.send(ChannelEvent::Closed);
            }
        }
    }

    #[derive(Default)]
    struct FakeConnector {
        journal: Journal,
        server: Arc<Mutex<Option<Sender<ChannelEvent>>>>,
        connects: Arc<AtomicUsize>,
        refuse: Arc<AtomicBool>,
    }

    impl StreamConnector for FakeConnector {
        fn connect(&self) -> Result<StreamLink, ChannelError> {
            if self.refuse.load(Ordering::SeqCst) {
                return Err(ChannelError::Connect("connection refused".into()));
            }
            self.connects.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = crossbeam_channel::unbounded();
            *self.server.lock().unwrap() = Some(tx.clone());
            Ok(StreamLink {
                signals: Box::new(FakeSender {
                    journal: self.journal.clone(),
                    events: Some(tx),
                }),
                events: rx,
            })
        }
    }

    struct Harness {
        session: PushStreamSession,
        journal: Journal,
        server: Arc<Mutex<Option<Sender<ChannelEvent>>>>,
        connects: Arc<AtomicUsize>,
        refuse: Arc<AtomicBool>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_results(Arc::new(ResultStore::headless()))
        }

        fn with_results(results: Arc<ResultStore>) -> Self {
            let connector = FakeConnector::default();
            let journal = connector.journal.clone();
            let server = connector.server.clone();
            let connects = connector.connects.clone();
            let refuse = connector.refuse.clone();
            Self {
                session: PushStreamSession::new(Box::new(connector), results),
                journal,
                server,
                connects,
                refuse,
            }
        }

        fn push(&self, event: ChannelEvent) {
            let server = self.server.lock().unwrap();
            let _ = server.as_ref().unwrap().send(event);
        }

        fn journal(&self) -> Vec<String> {
            self.journal.lock().unwrap().clone()
        }
    }

    /// Records the tag of every rendered frame and holds the first render
    /// until the test lets go.
    struct GatedSurface {
        rendered: Mutex<Vec<u8>>,
        first: AtomicBool,
        entered_tx: Sender<()>,
        release_rx: Receiver<()>,
    }

    impl DisplaySurface for GatedSurface {
        fn render(&self, result: &DetectionResult) {
            if let Some(image) = &result.annotated_image {
                self.rendered.lock().unwrap().push(image.bytes()[0]);
            }
            if self.first.swap(false, Ordering::SeqCst) {
                let _ = self.entered_tx.send(());
                let _ = self.release_rx.recv_timeout(Duration::from_secs(5));
            }
        }

        fn clear(&self) {}
    }

    fn frame(tag: u8) -> ChannelEvent {
        ChannelEvent::FrameUpdate(DetectionResult::new(
            Some(EncodedImage::jpeg(vec![tag])),
            vec![Detection::new(1, 0.5)],
        ))
    }

    fn shown_tag(session: &PushStreamSession) -> Option<u8> {
        session
            .results()
            .current()
            .and_then(|r| r.annotated_image.as_ref().map(|img| img.bytes()[0]))
    }

    fn wait_until(cond: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    // --- Tests ---

    #[test]
    fn test_start_connects_and_emits_start() {
        let mut h = Harness::new();
        assert_eq!(h.session.state(), StreamState::Idle);

        h.session.start().unwrap();

        assert_eq!(h.session.state(), StreamState::Streaming);
        assert_eq!(h.journal(), vec!["start_stream"]);
        assert_eq!(h.connects.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_start_twice_keeps_one_channel() {
        let mut h = Harness::new();
        h.session.start().unwrap();
        h.session.start().unwrap();
        assert_eq!(h.connects.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stop_emits_stop_before_close() {
        let mut h = Harness::new();
        h.session.start().unwrap();

        h.session.stop();

        assert_eq!(h.session.state(), StreamState::Idle);
        assert_eq!(h.journal(), vec!["start_stream", "stop_stream", "close"]);
    }

    #[test]
    fn test_stop_while_idle_does_nothing() {
        let mut h = Harness::new();
        h.session.stop();
        h.session.stop();
        assert!(h.journal().is_empty());
    }

    #[test]
    fn test_drop_while_streaming_emits_stop_then_closes() {
        let h = Harness::new();
        let journal = h.journal.clone();
        let Harness { mut session, .. } = h;
        session.start().unwrap();

        drop(session);

        assert_eq!(
            *journal.lock().unwrap(),
            vec!["start_stream", "stop_stream", "close"]
        );
    }

    #[test]
    fn test_frames_replace_display_newest_wins() {
        let mut h = Harness::new();
        h.session.start().unwrap();

        h.push(frame(1));
        h.push(frame(2));
        h.push(frame(3));

        wait_until(|| shown_tag(&h.session) == Some(3));
    }

    #[test]
    fn test_frames_queued_behind_slow_render_collapse_to_newest() {
        let (entered_tx, entered_rx) = crossbeam_channel::unbounded();
        let (release_tx, release_rx) = crossbeam_channel::unbounded();
        let surface = Arc::new(GatedSurface {
            rendered: Mutex::new(Vec::new()),
            first: AtomicBool::new(true),
            entered_tx,
            release_rx,
        });
        let mut h = Harness::with_results(Arc::new(ResultStore::new(surface.clone())));
        h.session.start().unwrap();

        h.push(frame(1));
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        h.push(frame(2));
        h.push(frame(3));
        h.push(frame(4));
        release_tx.send(()).unwrap();

        wait_until(|| shown_tag(&h.session) == Some(4));
        assert_eq!(*surface.rendered.lock().unwrap(), vec![1, 4]);
    }

    #[test]
    fn test_stop_clears_display_and_ignores_late_frames() {
        let mut h = Harness::new();
        h.session.start().unwrap();
        h.push(frame(7));
        wait_until(|| shown_tag(&h.session) == Some(7));

        h.session.stop();
        h.push(frame(8));
        std::thread::sleep(Duration::from_millis(20));

        assert!(h.session.results().current().is_none());
    }

    #[test]
    fn test_server_error_is_logged_without_state_change() {
        let mut h = Harness::new();
        h.session.start().unwrap();

        h.push(ChannelEvent::ServerError("camera busy".into()));
        h.push(frame(4));
        wait_until(|| shown_tag(&h.session) == Some(4));

        assert_eq!(h.session.state(), StreamState::Streaming);
    }

    #[test]
    fn test_channel_closed_by_server_returns_to_idle_without_reconnect() {
        let mut h = Harness::new();
        h.session.start().unwrap();

        h.push(ChannelEvent::Closed);
        wait_until(|| h.session.state() == StreamState::Idle);
        assert_eq!(h.connects.load(Ordering::SeqCst), 1);

        h.session.start().unwrap();
        assert_eq!(h.connects.load(Ordering::SeqCst), 2);
        assert_eq!(h.session.state(), StreamState::Streaming);
        // The dead channel was closed without a stop signal.
        assert_eq!(h.journal(), vec!["start_stream", "close", "start_stream"]);
    }

    #[test]
    fn test_refused_connection_stays_idle() {
        let mut h = Harness::new();
        h.refuse.store(true, Ordering::SeqCst);

        assert!(matches!(h.session.start(), Err(ChannelError::Connect(_))));
        assert_eq!(h.session.state(), StreamState::Idle);
    }

    #[test]
    fn test_toggles_emit_while_streaming() {
        let mut h = Harness::new();
        h.session.start().unwrap();

        assert!(!h.session.toggle_debug());
        assert_eq!(h.session.toggle_coordinator(), Coordinator::Main);

        assert_eq!(
            h.journal(),
            vec!["start_stream", "toggle_debug", "toggle_coordinator"]
        );
        assert!(!h.session.intent().debug_overlay);
    }

    #[test]
    fn test_toggles_while_idle_only_flip_local_intent() {
        let mut h = Harness::new();

        assert!(!h.session.toggle_debug());
        assert_eq!(h.session.toggle_coordinator(), Coordinator::Main);

        assert!(h.journal().is_empty());
        assert_eq!(h.session.intent().coordinator, Coordinator::Main);
    }
}

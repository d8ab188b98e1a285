use std::io::ErrorKind;
use std::net::TcpStream;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use serde::Deserialize;
use serde_json::Value;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

use crate::shared::detection_result::{Detection, DetectionResult};
use crate::shared::encoded_image::EncodedImage;
use crate::streaming::domain::stream_channel::{
    ChannelError, ChannelEvent, ControlSignal, SignalSender, StreamConnector, StreamLink,
};
use crate::streaming::infrastructure::socketio_packet::{Packet, PacketError};

type Socket = WebSocket<MaybeTlsStream<TcpStream>>;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
/// How long a read may block before pending commands are looked at again.
const POLL_INTERVAL: Duration = Duration::from_millis(20);
const CLOSE_DRAIN_READS: usize = 25;

const EVENT_FRAME_UPDATE: &str = "frame_update";
const EVENT_ERROR: &str = "error";

#[derive(Deserialize)]
struct FrameUpdatePayload {
    frame: String,
    #[serde(default)]
    detections: Vec<Detection>,
}

enum Command {
    Emit(ControlSignal),
    Close,
}

/// Connects to a Socket.IO server over its WebSocket transport.
pub struct SocketIoConnector {
    url: String,
}

impl SocketIoConnector {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
        }
    }

    /// Maps `http(s)://host[:port][/...]` to the Engine.IO WebSocket
    /// endpoint on the same host.
    pub fn websocket_url(&self) -> Result<String, ChannelError> {
        let (scheme, rest) = self
            .url
            .split_once("://")
            .ok_or_else(|| ChannelError::InvalidUrl(self.url.clone()))?;
        let ws_scheme = match scheme.to_ascii_lowercase().as_str() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            _ => return Err(ChannelError::InvalidUrl(self.url.clone())),
        };
        let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
        if authority.is_empty() {
            return Err(ChannelError::InvalidUrl(self.url.clone()));
        }
        Ok(format!(
            "{ws_scheme}://{authority}/socket.io/?EIO=4&transport=websocket"
        ))
    }
}

impl StreamConnector for SocketIoConnector {
    fn connect(&self) -> Result<StreamLink, ChannelError> {
        let ws_url = self.websocket_url()?;
        let (mut socket, _response) =
            tungstenite::connect(ws_url.as_str()).map_err(|e| ChannelError::Connect(e.to_string()))?;

        set_read_timeout(&socket, HANDSHAKE_TIMEOUT)?;
        let sid = handshake(&mut socket)?;
        set_read_timeout(&socket, POLL_INTERVAL)?;
        log::info!("Connected to stream service at {} (sid {sid})", self.url);

        let (command_tx, command_rx) = crossbeam_channel::unbounded();
        let (event_tx, event_rx) = crossbeam_channel::unbounded();
        let worker = std::thread::spawn(move || run_io(socket, command_rx, event_tx));

        Ok(StreamLink {
            signals: Box::new(SocketIoSender {
                commands: command_tx,
                worker: Some(worker),
            }),
            events: event_rx,
        })
    }
}

/// Write half handed to the session. Commands are executed in order by the
/// I/O thread, so a stop signal followed by `close` reaches the server
/// before the disconnect.
struct SocketIoSender {
    commands: Sender<Command>,
    worker: Option<JoinHandle<()>>,
}

impl SignalSender for SocketIoSender {
    fn emit(&mut self, signal: ControlSignal) -> Result<(), ChannelError> {
        if self.worker.is_none() {
            return Err(ChannelError::Closed);
        }
        self.commands
            .send(Command::Emit(signal))
            .map_err(|_| ChannelError::Closed)
    }

    fn close(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        let _ = self.commands.send(Command::Close);
        if worker.join().is_err() {
            log::error!("Stream I/O thread panicked");
        }
    }
}

impl Drop for SocketIoSender {
    fn drop(&mut self) {
        self.close();
    }
}

fn set_read_timeout(socket: &Socket, timeout: Duration) -> Result<(), ChannelError> {
    match socket.get_ref() {
        MaybeTlsStream::Plain(stream) => stream
            .set_read_timeout(Some(timeout))
            .map_err(|e| ChannelError::Connect(e.to_string())),
        _ => Ok(()),
    }
}

fn is_timeout(err: &tungstenite::Error) -> bool {
    matches!(err, tungstenite::Error::Io(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut))
}

fn send_packet(socket: &mut Socket, packet: &Packet) -> Result<(), tungstenite::Error> {
    socket.send(Message::Text(packet.encode()))
}

fn read_packet(socket: &mut Socket) -> Result<Option<Packet>, ChannelError> {
    match socket.read() {
        Ok(Message::Text(text)) => match Packet::decode(&text) {
            Ok(packet) => Ok(Some(packet)),
            Err(e) => {
                log::debug!("Ignoring stream packet: {e}");
                Ok(None)
            }
        },
        Ok(Message::Close(_)) => Err(ChannelError::Closed),
        Ok(_) => Ok(None),
        Err(e) if is_timeout(&e) => Err(ChannelError::Handshake("timed out".into())),
        Err(e) => Err(ChannelError::Handshake(e.to_string())),
    }
}

/// Engine.IO open, then Socket.IO connect on the default namespace.
fn handshake(socket: &mut Socket) -> Result<String, ChannelError> {
    let sid = loop {
        match read_packet(socket)? {
            Some(Packet::Open(info)) => break info.sid,
            Some(other) => {
                return Err(ChannelError::Handshake(format!(
                    "expected open packet, got {other:?}"
                )))
            }
            None => continue,
        }
    };

    send_packet(socket, &Packet::Connect).map_err(|e| ChannelError::Handshake(e.to_string()))?;

    loop {
        match read_packet(socket)? {
            Some(Packet::Connect) => return Ok(sid),
            Some(Packet::ConnectError(message)) => return Err(ChannelError::Handshake(message)),
            Some(Packet::Ping) => {
                send_packet(socket, &Packet::Pong)
                    .map_err(|e| ChannelError::Handshake(e.to_string()))?;
            }
            Some(Packet::Close) | Some(Packet::Disconnect) => return Err(ChannelError::Closed),
            _ => continue,
        }
    }
}

enum Flow {
    Continue,
    Stop,
}

/// Owns the socket for the life of the link.
fn run_io(mut socket: Socket, commands: Receiver<Command>, events: Sender<ChannelEvent>) {
    loop {
        if let Flow::Stop = drain_commands(&mut socket, &commands) {
            disconnect(&mut socket);
            let _ = events.send(ChannelEvent::Closed);
            return;
        }

        let flow = match socket.read() {
            Ok(Message::Text(text)) => handle_text(&mut socket, &text, &events),
            Ok(Message::Close(_)) => {
                log::info!("Stream service closed the connection");
                Flow::Stop
            }
            Ok(_) => Flow::Continue,
            Err(e) if is_timeout(&e) => Flow::Continue,
            Err(e) => {
                log::warn!("Stream connection lost: {e}");
                Flow::Stop
            }
        };

        if let Flow::Stop = flow {
            let _ = events.send(ChannelEvent::Closed);
            return;
        }
    }
}

fn drain_commands(socket: &mut Socket, commands: &Receiver<Command>) -> Flow {
    loop {
        match commands.try_recv() {
            Ok(Command::Emit(signal)) => {
                log::debug!("Emitting {}", signal.event_name());
                if let Err(e) = send_packet(socket, &Packet::event(signal.event_name())) {
                    log::warn!("Failed to send {}: {e}", signal.event_name());
                }
            }
            Ok(Command::Close) | Err(TryRecvError::Disconnected) => return Flow::Stop,
            Err(TryRecvError::Empty) => return Flow::Continue,
        }
    }
}

fn disconnect(socket: &mut Socket) {
    let _ = send_packet(socket, &Packet::Disconnect);
    if socket.close(None).is_err() {
        return;
    }
    // Give the server a moment to acknowledge the close frame.
    for _ in 0..CLOSE_DRAIN_READS {
        match socket.read() {
            Ok(_) => {}
            Err(e) if is_timeout(&e) => {}
            Err(_) => break,
        }
    }
}

fn handle_text(socket: &mut Socket, text: &str, events: &Sender<ChannelEvent>) -> Flow {
    let packet = match Packet::decode(text) {
        Ok(packet) => packet,
        Err(PacketError::Unsupported(kind)) => {
            log::debug!("Ignoring socket.io packet type {kind}");
            return Flow::Continue;
        }
        Err(e) => {
            log::debug!("Ignoring stream packet: {e}");
            return Flow::Continue;
        }
    };

    let event = match packet {
        Packet::Ping => {
            if let Err(e) = send_packet(socket, &Packet::Pong) {
                log::warn!("Failed to answer ping: {e}");
            }
            return Flow::Continue;
        }
        Packet::Close | Packet::Disconnect => {
            log::info!("Stream service ended the session");
            return Flow::Stop;
        }
        Packet::Event { name, data } => match decode_event(&name, data) {
            Some(event) => event,
            None => return Flow::Continue,
        },
        _ => return Flow::Continue,
    };

    match events.send(event) {
        Ok(()) => Flow::Continue,
        Err(_) => Flow::Stop,
    }
}

fn decode_event(name: &str, data: Option<Value>) -> Option<ChannelEvent> {
    match name {
        EVENT_FRAME_UPDATE => {
            let payload: FrameUpdatePayload = match data.map(serde_json::from_value) {
                Some(Ok(payload)) => payload,
                Some(Err(e)) => {
                    log::warn!("Dropping malformed frame update: {e}");
                    return None;
                }
                None => {
                    log::warn!("Dropping frame update without payload");
                    return None;
                }
            };
            let frame = if payload.frame.starts_with("data:") {
                EncodedImage::from_data_url(&payload.frame)
            } else {
                EncodedImage::from_base64_jpeg(&payload.frame)
            };
            match frame {
                Ok(frame) => Some(ChannelEvent::FrameUpdate(DetectionResult::new(
                    Some(frame),
                    payload.detections,
                ))),
                Err(e) => {
                    log::warn!("Dropping frame update with undecodable frame: {e}");
                    None
                }
            }
        }
        EVENT_ERROR => {
            let message = match data {
                Some(Value::Object(map)) => map
                    .get("error")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| Value::Object(map.clone()).to_string()),
                Some(Value::String(message)) => message,
                Some(other) => other.to_string(),
                None => "unknown stream error".to_string(),
            };
            Some(ChannelEvent::ServerError(message))
        }
        other => {
            log::debug!("Ignoring stream event '{other}'");
            None
        }
    }
}

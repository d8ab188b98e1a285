//! Text framing for Socket.IO v5 carried over the Engine.IO v4 WebSocket
//! transport.
//!
//! Every WebSocket text message is one Engine.IO packet: a single type digit
//! followed by its payload. Type `4` (message) wraps a Socket.IO packet,
//! which again starts with a type digit. Only the default namespace and
//! non-binary packets are supported.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PacketError {
    #[error("empty packet")]
    Empty,
    #[error("unknown packet type '{0}'")]
    UnknownType(char),
    #[error("unsupported socket.io packet type '{0}'")]
    Unsupported(char),
    #[error("malformed packet payload: {0}")]
    Malformed(String),
    #[error("invalid packet json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Session parameters the server announces in its open packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenInfo {
    pub sid: String,
    #[serde(default)]
    pub ping_interval: u64,
    #[serde(default)]
    pub ping_timeout: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Open(OpenInfo),
    Close,
    Ping,
    Pong,
    Noop,
    Connect,
    ConnectError(String),
    Disconnect,
    Event { name: String, data: Option<Value> },
}

impl Packet {
    pub fn event(name: &str) -> Self {
        Packet::Event {
            name: name.to_string(),
            data: None,
        }
    }

    pub fn encode(&self) -> String {
        match self {
            Packet::Open(info) => {
                format!("0{}", serde_json::to_string(info).unwrap_or_default())
            }
            Packet::Close => "1".to_string(),
            Packet::Ping => "2".to_string(),
            Packet::Pong => "3".to_string(),
            Packet::Noop => "6".to_string(),
            Packet::Connect => "40".to_string(),
            Packet::ConnectError(message) => {
                format!("44{}", serde_json::json!({ "message": message }))
            }
            Packet::Disconnect => "41".to_string(),
            Packet::Event { name, data } => {
                let mut args = vec![Value::String(name.clone())];
                if let Some(data) = data {
                    args.push(data.clone());
                }
                format!("42{}", Value::Array(args))
            }
        }
    }

    pub fn decode(text: &str) -> Result<Self, PacketError> {
        let mut chars = text.chars();
        let kind = chars.next().ok_or(PacketError::Empty)?;
        let payload = chars.as_str();
        match kind {
            '0' => Ok(Packet::Open(serde_json::from_str(payload)?)),
            '1' => Ok(Packet::Close),
            '2' => Ok(Packet::Ping),
            '3' => Ok(Packet::Pong),
            '6' => Ok(Packet::Noop),
            '4' => decode_socket_packet(payload),
            other => Err(PacketError::UnknownType(other)),
        }
    }
}

fn decode_socket_packet(text: &str) -> Result<Packet, PacketError> {
    let mut chars = text.chars();
    let kind = chars.next().ok_or(PacketError::Empty)?;
    let body = strip_namespace(chars.as_str());
    match kind {
        '0' => Ok(Packet::Connect),
        '1' => Ok(Packet::Disconnect),
        '2' => decode_event(body),
        '4' => Ok(Packet::ConnectError(connect_error_message(body))),
        '3' | '5' | '6' => Err(PacketError::Unsupported(kind)),
        other => Err(PacketError::UnknownType(other)),
    }
}

/// Drops a leading `/namespace,` if present.
fn strip_namespace(body: &str) -> &str {
    if body.starts_with('/') {
        match body.find(',') {
            Some(comma) => &body[comma + 1..],
            None => "",
        }
    } else {
        body
    }
}

fn decode_event(body: &str) -> Result<Packet, PacketError> {
    // An optional ack id precedes the argument array.
    let args = body.trim_start_matches(|c: char| c.is_ascii_digit());
    let value: Value = serde_json::from_str(args)?;
    let Value::Array(mut items) = value else {
        return Err(PacketError::Malformed("event arguments are not an array".into()));
    };
    if items.is_empty() {
        return Err(PacketError::Malformed("event has no name".into()));
    }
    let name = match items.remove(0) {
        Value::String(name) => name,
        other => {
            return Err(PacketError::Malformed(format!(
                "event name is not a string: {other}"
            )))
        }
    };
    let data = if items.is_empty() {
        None
    } else {
        Some(items.remove(0))
    };
    Ok(Packet::Event { name, data })
}

fn connect_error_message(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => map
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| Value::Object(map.clone()).to_string()),
        Ok(Value::String(message)) => message,
        Ok(other) => other.to_string(),
        Err(_) => body.to_string(),
    }
}

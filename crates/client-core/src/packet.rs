//! Packet data model of both protocol layers.
//!
//! | Engine.IO type | Digit | Socket.IO type | Digit |
//! |----------------|-------|----------------|-------|
//! | open           | 0     | connect        | 0     |
//! | close          | 1     | disconnect     | 1     |
//! | ping           | 2     | event          | 2     |
//! | pong           | 3     | ack            | 3     |
//! | message        | 4     | error          | 4     |
//! | upgrade        | 5     | binary event   | 5     |
//! | noop           | 6     | binary ack     | 6     |
use bytes::Bytes;

use crate::value::{Value, ValueError, ValueKind};

/// Per packet send options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketOptions {
    /// Whether the transport may compress this packet.
    /// Defaults to true.
    pub compress: bool,
}

impl Default for PacketOptions {
    fn default() -> Self {
        Self { compress: true }
    }
}

/// An engine.io packet type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnginePacketType {
    /// Handshake sent by the server.
    Open,
    /// Ask the other side to close the transport.
    Close,
    /// Heartbeat probe sent by the client.
    Ping,
    /// Heartbeat reply sent by the server.
    Pong,
    /// Application data.
    Message,
    /// Switch the session to the probed transport.
    Upgrade,
    /// Empty packet, used to terminate a pending poll.
    Noop,
    /// Not part of the wire protocol: the result of decoding a malformed packet.
    Error,
}

impl EnginePacketType {
    /// The wire digit of this type. [`EnginePacketType::Error`] has none.
    pub fn index(self) -> Option<u8> {
        match self {
            EnginePacketType::Open => Some(0),
            EnginePacketType::Close => Some(1),
            EnginePacketType::Ping => Some(2),
            EnginePacketType::Pong => Some(3),
            EnginePacketType::Message => Some(4),
            EnginePacketType::Upgrade => Some(5),
            EnginePacketType::Noop => Some(6),
            EnginePacketType::Error => None,
        }
    }

    /// Parse a wire digit value (`0..=6`).
    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(EnginePacketType::Open),
            1 => Some(EnginePacketType::Close),
            2 => Some(EnginePacketType::Ping),
            3 => Some(EnginePacketType::Pong),
            4 => Some(EnginePacketType::Message),
            5 => Some(EnginePacketType::Upgrade),
            6 => Some(EnginePacketType::Noop),
            _ => None,
        }
    }
}

/// A single engine.io packet. Packets are built fresh for every send.
#[derive(Debug, Clone, PartialEq)]
pub struct EnginePacket {
    /// Packet type.
    pub kind: EnginePacketType,
    /// Packet data, [`Value::None`] when the packet carries nothing.
    pub data: Value,
    /// Send options.
    pub options: PacketOptions,
}

impl EnginePacket {
    /// A packet without data.
    pub fn new(kind: EnginePacketType) -> Self {
        Self::with_data(kind, Value::None)
    }

    /// A packet carrying `data`.
    pub fn with_data(kind: EnginePacketType, data: impl Into<Value>) -> Self {
        Self {
            kind,
            data: data.into(),
            options: PacketOptions::default(),
        }
    }

    /// A message packet.
    pub fn message(data: impl Into<Value>) -> Self {
        Self::with_data(EnginePacketType::Message, data)
    }

    /// The sentinel produced by decoders on malformed input.
    pub fn error() -> Self {
        Self::with_data(EnginePacketType::Error, "parser error")
    }

    /// Returns true for the decoder error sentinel.
    pub fn is_error(&self) -> bool {
        self.kind == EnginePacketType::Error
    }
}

/// A socket.io packet type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketPacketType {
    #[allow(missing_docs)]
    Connect,
    #[allow(missing_docs)]
    Disconnect,
    #[allow(missing_docs)]
    Event,
    #[allow(missing_docs)]
    Ack,
    #[allow(missing_docs)]
    Error,
    #[allow(missing_docs)]
    BinaryEvent,
    #[allow(missing_docs)]
    BinaryAck,
}

impl SocketPacketType {
    /// The wire digit of this type.
    pub fn index(self) -> u8 {
        match self {
            SocketPacketType::Connect => 0,
            SocketPacketType::Disconnect => 1,
            SocketPacketType::Event => 2,
            SocketPacketType::Ack => 3,
            SocketPacketType::Error => 4,
            SocketPacketType::BinaryEvent => 5,
            SocketPacketType::BinaryAck => 6,
        }
    }

    /// Parse a wire digit value (`0..=6`).
    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(SocketPacketType::Connect),
            1 => Some(SocketPacketType::Disconnect),
            2 => Some(SocketPacketType::Event),
            3 => Some(SocketPacketType::Ack),
            4 => Some(SocketPacketType::Error),
            5 => Some(SocketPacketType::BinaryEvent),
            6 => Some(SocketPacketType::BinaryAck),
            _ => None,
        }
    }

    /// Binary packet types carry attachments.
    pub fn is_binary(self) -> bool {
        matches!(
            self,
            SocketPacketType::BinaryEvent | SocketPacketType::BinaryAck
        )
    }
}

/// A socket.io packet.
#[derive(Debug, Clone, PartialEq)]
pub struct SocketPacket {
    /// Packet type.
    pub kind: SocketPacketType,
    /// Namespace, `/` by default.
    pub nsp: String,
    /// Ack id, `None` when no acknowledgement is requested.
    pub id: Option<u64>,
    /// Number of binary attachments, `None` for non binary packets or once they are consumed.
    pub attachments: Option<usize>,
    /// For events: an array whose first element is the event name.
    pub data: Value,
    /// Query appended to the namespace of connect packets.
    pub query: Option<String>,
    /// Send options.
    pub options: PacketOptions,
}

impl SocketPacket {
    /// A packet of type `kind` for namespace `nsp`.
    pub fn new(kind: SocketPacketType, nsp: impl Into<String>, data: Value) -> Self {
        Self {
            kind,
            nsp: nsp.into(),
            id: None,
            attachments: None,
            data,
            query: None,
            options: PacketOptions::default(),
        }
    }

    /// A connect packet.
    pub fn connect(nsp: impl Into<String>) -> Self {
        Self::new(SocketPacketType::Connect, nsp, Value::None)
    }

    /// A disconnect packet.
    pub fn disconnect(nsp: impl Into<String>) -> Self {
        Self::new(SocketPacketType::Disconnect, nsp, Value::None)
    }

    /// An event packet. The binary variant is chosen if `args` contains binary data.
    pub fn event(nsp: impl Into<String>, args: Vec<Value>) -> Self {
        let data = Value::Array(args);
        let kind = if data.has_binary() {
            SocketPacketType::BinaryEvent
        } else {
            SocketPacketType::Event
        };
        Self::new(kind, nsp, data)
    }

    /// An ack packet answering `id`. The binary variant is chosen if `args` contains binary data.
    pub fn ack(nsp: impl Into<String>, args: Vec<Value>, id: u64) -> Self {
        let data = Value::Array(args);
        let kind = if data.has_binary() {
            SocketPacketType::BinaryAck
        } else {
            SocketPacketType::Ack
        };
        let mut packet = Self::new(kind, nsp, data);
        packet.id = Some(id);
        packet
    }

    /// The event name of an event packet.
    pub fn event_name(&self) -> Result<&str, ValueError> {
        match self.data.as_array()?.first() {
            Some(name) => name.as_str(),
            None => Err(ValueError::TypeMismatch {
                expected: ValueKind::Str,
                found: ValueKind::None,
            }),
        }
    }
}

/// A wire unit handed to or received from a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A text frame.
    Text(String),
    /// A binary frame.
    Binary(Bytes),
}

impl Frame {
    /// The frame length in bytes.
    pub fn len(&self) -> usize {
        match self {
            Frame::Text(s) => s.len(),
            Frame::Binary(b) => b.len(),
        }
    }

    /// Returns true if the frame carries nothing.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Frame> for Value {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(s) => Value::Str(s),
            Frame::Binary(b) => Value::Binary(b),
        }
    }
}

impl TryFrom<Value> for Frame {
    type Error = ValueError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Str(s) => Ok(Frame::Text(s)),
            Value::Binary(b) => Ok(Frame::Binary(b)),
            v => Err(ValueError::TypeMismatch {
                expected: ValueKind::Str,
                found: v.kind(),
            }),
        }
    }
}

impl From<String> for Frame {
    fn from(value: String) -> Self {
        Frame::Text(value)
    }
}
impl From<&str> for Frame {
    fn from(value: &str) -> Self {
        Frame::Text(value.to_string())
    }
}
impl From<Bytes> for Frame {
    fn from(value: Bytes) -> Self {
        Frame::Binary(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_picks_binary_type() {
        let packet = SocketPacket::event("/", vec!["ev".into(), Value::Binary(vec![1].into())]);
        assert_eq!(packet.kind, SocketPacketType::BinaryEvent);
        let packet = SocketPacket::event("/", vec!["ev".into(), 1.into()]);
        assert_eq!(packet.kind, SocketPacketType::Event);
        assert_eq!(packet.event_name(), Ok("ev"));
    }

    #[test]
    fn ack_packet() {
        let packet = SocketPacket::ack("/admin", vec!["ok".into()], 4);
        assert_eq!(packet.kind, SocketPacketType::Ack);
        assert_eq!(packet.id, Some(4));
        assert_eq!(packet.nsp, "/admin");
    }

    #[test]
    fn packet_type_index() {
        for i in 0..=6 {
            assert_eq!(SocketPacketType::from_index(i).unwrap().index(), i);
            assert_eq!(EnginePacketType::from_index(i).unwrap().index(), Some(i));
        }
        assert!(SocketPacketType::from_index(7).is_none());
        assert!(EnginePacketType::from_index(7).is_none());
        assert_eq!(EnginePacketType::Error.index(), None);
    }

    #[test]
    fn frame_from_value() {
        assert_eq!(Frame::try_from(Value::from("4hi")), Ok(Frame::Text("4hi".into())));
        assert!(Frame::try_from(Value::Int(1)).is_err());
    }
}

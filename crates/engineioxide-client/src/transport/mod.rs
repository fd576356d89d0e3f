//! Transports carry engine.io packets over a concrete channel.
//!
//! [`Transport`] is the shared contract: `open`, `close`, `send` and `pause` are driven by
//! the [`Socket`](crate::Socket), while the outcome of I/O is fed through
//! [`Transport::handle_io`] and surfaces as [`TransportEvent`]s polled with
//! [`Transport::poll_event`].
//!
//! The ready state goes `None -> Opening -> Open -> Closed`. A polling transport can also go
//! `Open -> Pausing -> Paused` while the socket upgrades to another transport.
use std::{
    collections::VecDeque,
    fmt,
    str::FromStr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{SystemTime, UNIX_EPOCH},
};

use socketioxide_client_core::{EnginePacket, Frame};
use url::Url;

use crate::{
    config::SocketConfig,
    errors::Error,
    io::{Io, IoEvent, TimerHandle, TransportId},
    parser::decode_packet,
};

pub mod polling;
pub mod ws;

/// The engine.io protocol revision spoken by this client.
pub const PROTOCOL: &str = "3";

/// The type of `transport` used to connect to the server.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TransportType {
    /// Polling transport
    Polling,
    /// Websocket transport
    Websocket,
}

impl TransportType {
    /// The name used in the `transport` query parameter.
    pub fn as_str(self) -> &'static str {
        match self {
            TransportType::Polling => "polling",
            TransportType::Websocket => "websocket",
        }
    }
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cannot determine the transport type.
#[derive(Debug, Clone)]
pub struct UnknownTransportError(pub String);
impl fmt::Display for UnknownTransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown transport type: {}", self.0)
    }
}
impl std::error::Error for UnknownTransportError {}

impl FromStr for TransportType {
    type Err = UnknownTransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "websocket" => Ok(TransportType::Websocket),
            "polling" => Ok(TransportType::Polling),
            _ => Err(UnknownTransportError(s.to_string())),
        }
    }
}

/// Transport ready state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    #[allow(missing_docs)]
    None,
    #[allow(missing_docs)]
    Opening,
    #[allow(missing_docs)]
    Open,
    #[allow(missing_docs)]
    Closing,
    #[allow(missing_docs)]
    Closed,
    /// Waiting for in flight requests before pausing.
    Pausing,
    /// No more requests are issued.
    Paused,
}

/// Events produced by a transport.
#[derive(Debug)]
pub enum TransportEvent {
    /// The transport is open and writable.
    Open,
    /// A packet was received.
    Packet(EnginePacket),
    /// Every packet handed to [`Transport::send`] was flushed.
    Drain,
    /// The transport is closed.
    Close,
    /// The transport failed.
    Error(Error),
    /// A [`Transport::pause`] request completed.
    Paused,
}

/// State shared by every transport.
#[derive(Debug)]
pub struct TransportBase {
    pub(crate) id: TransportId,
    pub(crate) kind: TransportType,
    pub(crate) state: ReadyState,
    pub(crate) writable: bool,
    pub(crate) supports_binary: bool,
    pub(crate) sid: Option<String>,
    pub(crate) config: Arc<SocketConfig>,
    pub(crate) io: Io,
    events: VecDeque<TransportEvent>,
}

static TIMESTAMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// A cache busting token: the current time in milliseconds and a sequence number, base 36.
fn timestamp() -> String {
    fn base36(mut n: u128, out: &mut String) {
        const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
        let mut digits = Vec::new();
        loop {
            digits.push(ALPHABET[(n % 36) as usize]);
            n /= 36;
            if n == 0 {
                break;
            }
        }
        out.extend(digits.iter().rev().map(|&d| char::from(d)));
    }
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let mut out = String::new();
    base36(now, &mut out);
    out.push('.');
    base36(TIMESTAMP_SEQ.fetch_add(1, Ordering::Relaxed).into(), &mut out);
    out
}

impl TransportBase {
    pub(crate) fn new(
        kind: TransportType,
        config: Arc<SocketConfig>,
        io: Io,
        sid: Option<String>,
    ) -> Self {
        Self {
            id: io.next_transport_id(),
            kind,
            state: ReadyState::None,
            writable: false,
            supports_binary: !config.force_base64,
            sid,
            config,
            io,
            events: VecDeque::new(),
        }
    }

    pub(crate) fn emit(&mut self, event: TransportEvent) {
        self.events.push_back(event);
    }

    pub(crate) fn on_open(&mut self) {
        tracing::debug!(transport = %self.kind, id = self.id, "transport open");
        self.state = ReadyState::Open;
        self.writable = true;
        self.emit(TransportEvent::Open);
    }

    pub(crate) fn on_close(&mut self) {
        tracing::debug!(transport = %self.kind, id = self.id, "transport closed");
        self.state = ReadyState::Closed;
        self.emit(TransportEvent::Close);
    }

    pub(crate) fn on_error(&mut self, message: &'static str, description: Option<String>) {
        tracing::debug!(transport = %self.kind, id = self.id, ?description, "{message}");
        self.emit(TransportEvent::Error(Error::Transport {
            transport: self.kind,
            message,
            description,
        }));
    }

    pub(crate) fn on_packet(&mut self, packet: EnginePacket) {
        self.emit(TransportEvent::Packet(packet));
    }

    pub(crate) fn on_data(&mut self, frame: &Frame) {
        let packet = decode_packet(frame, false);
        self.on_packet(packet);
    }

    /// Build the request uri for this transport.
    pub(crate) fn uri(&self, timestamp_default: bool) -> Result<Url, Error> {
        let config = &self.config;
        let scheme = match (self.kind, config.secure) {
            (TransportType::Polling, false) => "http",
            (TransportType::Polling, true) => "https",
            (TransportType::Websocket, false) => "ws",
            (TransportType::Websocket, true) => "wss",
        };
        let host = if config.hostname.contains(':') {
            format!("[{}]", config.hostname)
        } else {
            config.hostname.clone()
        };
        let mut url = Url::parse(&format!(
            "{scheme}://{host}:{}{}",
            config.port,
            config.normalized_path()
        ))?;
        {
            let mut query = url.query_pairs_mut();
            query.extend_pairs(config.query.iter());
            query.append_pair("EIO", PROTOCOL);
            query.append_pair("transport", self.kind.as_str());
            if let Some(sid) = &self.sid {
                query.append_pair("sid", sid);
            }
            if !self.supports_binary && self.sid.is_none() {
                query.append_pair("b64", "1");
            }
            if config.timestamp_requests.unwrap_or(timestamp_default) {
                query.append_pair(&config.timestamp_param, &timestamp());
            }
        }
        Ok(url)
    }
}

/// The transport contract. See the [module docs](self).
pub trait Transport: Send + fmt::Debug {
    #[doc(hidden)]
    fn base(&self) -> &TransportBase;
    #[doc(hidden)]
    fn base_mut(&mut self) -> &mut TransportBase;

    /// Start opening the underlying channel.
    fn do_open(&mut self);
    /// Close the underlying channel.
    fn do_close(&mut self);
    /// Write packets. Only called while the transport is open.
    fn write(&mut self, packets: &[EnginePacket]);
    /// Stop issuing requests. [`TransportEvent::Paused`] is emitted once nothing is in flight.
    fn pause(&mut self);
    /// Returns true if [`Transport::pause`] is meaningful for this transport.
    fn supports_pause(&self) -> bool;
    /// Feed the completion of an operation started by this transport.
    fn handle_io(&mut self, event: IoEvent);

    /// Returns true if the timeout `handle` was set by this transport.
    fn owns_timer(&self, _handle: TimerHandle) -> bool {
        false
    }

    /// Open the transport. No-op unless the state is `None` or `Closed`.
    fn open(&mut self) -> bool {
        let base = self.base_mut();
        if !matches!(base.state, ReadyState::None | ReadyState::Closed) {
            return false;
        }
        base.state = ReadyState::Opening;
        self.do_open();
        true
    }

    /// Close the transport. No-op unless the state is `Opening` or `Open`.
    fn close(&mut self) {
        if matches!(self.base().state, ReadyState::Opening | ReadyState::Open) {
            self.do_close();
            self.base_mut().on_close();
        }
    }

    /// Send packets. Returns false without touching the wire unless the transport is open.
    fn send(&mut self, packets: &[EnginePacket]) -> bool {
        if self.base().state == ReadyState::Open {
            self.write(packets);
            true
        } else {
            tracing::debug!(state = ?self.base().state, "transport not open");
            false
        }
    }

    /// Set the session id sent with every request.
    fn set_sid(&mut self, sid: String) {
        self.base_mut().sid = Some(sid);
    }

    /// Pop the next pending event.
    fn poll_event(&mut self) -> Option<TransportEvent> {
        self.base_mut().events.pop_front()
    }

    /// Drop every pending event.
    fn discard_events(&mut self) {
        self.base_mut().events.clear();
    }

    /// Unique id of this transport.
    fn id(&self) -> TransportId {
        self.base().id
    }
    /// Transport type.
    fn kind(&self) -> TransportType {
        self.base().kind
    }
    /// Current ready state.
    fn state(&self) -> ReadyState {
        self.base().state
    }
    /// Returns true if the transport accepts a write.
    fn writable(&self) -> bool {
        self.base().writable
    }
    /// Returns true if binary frames are sent as is.
    fn supports_binary(&self) -> bool {
        self.base().supports_binary
    }
}

/// Instantiate the transport called `name`.
pub fn create(
    name: &str,
    config: Arc<SocketConfig>,
    io: Io,
    sid: Option<String>,
) -> Result<Box<dyn Transport>, Error> {
    let kind = TransportType::from_str(name).map_err(|e| Error::UnknownTransport(e.0))?;
    let base = TransportBase::new(kind, config, io, sid);
    Ok(match kind {
        TransportType::Polling => Box::new(polling::Polling::new(base)),
        TransportType::Websocket => Box::new(ws::WebSocket::new(base)),
    })
}
